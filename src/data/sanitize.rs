use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// Zero-width and byte-order-mark characters that LLM-authored files pick up.
const INVISIBLE_CHARS: [char; 5] = ['\u{200b}', '\u{200c}', '\u{200d}', '\u{2060}', '\u{feff}'];

/// Remove invisible characters and surrounding whitespace.
pub fn strip_invisible(raw: &str) -> String {
    raw.chars()
        .filter(|c| !INVISIBLE_CHARS.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unparseable timestamp: {0:?}")]
pub struct TimestampError(pub String);

/// Parse an ISO-8601-family timestamp. Values without an offset are taken as UTC,
/// a bare date as midnight UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    let cleaned = strip_invisible(raw);
    if cleaned.is_empty() {
        return Err(TimestampError(raw.to_string()));
    }

    // "2025-12-11 00:00:00Z" -> "2025-12-11T00:00:00+00:00"
    let mut s = cleaned.clone();
    if s.len() > 10 && s.as_bytes()[10] == b' ' {
        s.replace_range(10..11, "T");
    }
    if s.ends_with('Z') || s.ends_with('z') {
        s.truncate(s.len() - 1);
        s.push_str("+00:00");
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%z"] {
        if let Ok(dt) = DateTime::parse_from_str(&s, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    Err(TimestampError(cleaned))
}

/// Rewrite a timestamp as `YYYY-MM-DDTHH:MM:SS.000Z`. Unparseable values are
/// reported and returned cleaned but otherwise unchanged.
pub fn normalize_timestamp(raw: &str) -> String {
    match parse_timestamp(raw) {
        Ok(dt) => dt.format("%Y-%m-%dT%H:%M:%S.000Z").to_string(),
        Err(e) => {
            warn!("{}", e);
            strip_invisible(raw)
        }
    }
}

/// Compact `YYYYMMDD` key of the instant's calendar date in `tz`.
pub fn local_date_key(ts: DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format("%Y%m%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_invisible() {
        assert_eq!(strip_invisible("timestamp\u{200b}"), "timestamp");
        assert_eq!(strip_invisible("\u{feff}rank"), "rank");
        assert_eq!(strip_invisible("  Lakers -4.5 "), "Lakers -4.5");
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2025, 12, 11, 0, 0, 0).unwrap();

        for raw in [
            "2025-12-11T00:00:00.000Z",
            "2025-12-11T00:00:00Z",
            "2025-12-11 00:00:00+00:00",
            "2025-12-11 00:00:00",
            "2025-12-11T00:00:00\u{200b}",
            "2025-12-10T16:00:00-08:00",
            "2025-12-11",
        ] {
            assert_eq!(parse_timestamp(raw).unwrap(), expected, "{raw:?}");
        }
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("tomorrow night").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn test_normalize_timestamp() {
        assert_eq!(normalize_timestamp("2025-12-11 03:04:05+00:00"), "2025-12-11T03:04:05.000Z");
        assert_eq!(normalize_timestamp("soon\u{200b}"), "soon");
    }

    #[test]
    fn test_local_date_key_crosses_midnight() {
        // 02:00 UTC on Nov 1 is still Oct 31 in Los Angeles
        let ts = Utc.with_ymd_and_hms(2025, 11, 1, 2, 0, 0).unwrap();
        assert_eq!(local_date_key(ts, chrono_tz::America::Los_Angeles), "20251031");
        assert_eq!(local_date_key(ts, chrono_tz::UTC), "20251101");
    }
}

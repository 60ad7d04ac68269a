use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use crate::data::csv_table::CsvRow;
use crate::data::sanitize::strip_invisible;

/// A single cell from a scraped or authored table. Nulls are `Option::None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    /// Parse a raw cell. Empty, `N/A` and `NaN` cells are null.
    pub fn parse(raw: &str) -> Option<Value> {
        let cleaned = strip_invisible(raw);
        if cleaned.is_empty() {
            return None;
        }

        match cleaned.to_ascii_lowercase().as_str() {
            "n/a" | "na" | "nan" | "null" | "none" => return None,
            _ => {}
        }

        match cleaned.parse::<f64>() {
            Ok(n) if n.is_finite() => Some(Value::Number(n)),
            _ => Some(Value::Text(cleaned)),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Number(_) => None,
            Value::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Canonical game id. Writers disagree on "261702" vs "261702.0".
pub fn normalize_game_id(raw: &str) -> Option<String> {
    match Value::parse(raw)? {
        Value::Number(n) if n.fract() == 0.0 => Some(format!("{}", n as i64)),
        other => Some(other.to_string()),
    }
}

/// Column access shared by everything the change filter can compress.
pub trait Record {
    fn field(&self, column: &str) -> Option<Value>;
}

/// Columns of a scrape row that are identity/bookkeeping rather than market metrics.
pub const SNAPSHOT_KEY_COLUMNS: [&str; 7] = [
    "game_id",
    "home_team",
    "away_team",
    "start_time",
    "status",
    "date_scraped",
    "start_time_pt",
];

/// One scrape observation of a game's market state.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub game_id: String,
    pub home_team: String,
    pub away_team: String,
    /// Kept as scraped; parsed on demand so malformed values survive ingestion.
    pub start_time: String,
    pub scraped_at: String,
    pub status: String,
    pub metrics: BTreeMap<String, Value>,
}

impl Snapshot {
    /// Build a snapshot from a scrape row. `scraped_at` is used when the row has no
    /// `date_scraped` column of its own.
    pub fn from_row(row: &CsvRow<'_>, scraped_at: &str) -> Option<Self> {
        let game_id = normalize_game_id(row.get("game_id")?)?;

        let metrics = row
            .columns()
            .filter(|(column, _)| !SNAPSHOT_KEY_COLUMNS.contains(column))
            .filter_map(|(column, raw)| Value::parse(raw).map(|v| (column.to_string(), v)))
            .collect();

        Some(Self {
            game_id,
            home_team: row.get("home_team").unwrap_or_default().to_string(),
            away_team: row.get("away_team").unwrap_or_default().to_string(),
            start_time: row.get("start_time").unwrap_or_default().to_string(),
            scraped_at: row
                .get("date_scraped")
                .map(str::to_string)
                .unwrap_or_else(|| scraped_at.to_string()),
            status: row.get("status").unwrap_or_default().to_string(),
            metrics,
        })
    }

    pub fn is_scheduled(&self) -> bool {
        self.status == "scheduled"
    }
}

impl Record for Snapshot {
    fn field(&self, column: &str) -> Option<Value> {
        let text = match column {
            "game_id" => &self.game_id,
            "home_team" => &self.home_team,
            "away_team" => &self.away_team,
            "start_time" => &self.start_time,
            "date_scraped" | "scraped_at" => &self.scraped_at,
            "status" => &self.status,
            _ => return self.metrics.get(column).cloned(),
        };

        if text.is_empty() {
            None
        } else {
            Some(Value::Text(text.clone()))
        }
    }
}

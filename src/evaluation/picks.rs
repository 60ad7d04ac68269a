use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use tracing::warn;
use crate::data::csv_table::{CsvRow, CsvTable};
use crate::data::sanitize::{local_date_key, parse_timestamp, TimestampError};
use crate::data::types::{normalize_game_id, Value};
use crate::evaluation::types::{Market, Pick, Side, TotalSide};

/// Header of a picks file, in order.
pub const PICKS_COLUMNS: [&str; 27] = [
    "rank",
    "game_id",
    "start_time",
    "match",
    "pick",
    "odds",
    "units",
    "confidence_pct",
    "reason",
    "predicted_score",
    "bet_home_spread",
    "bet_home_ml",
    "bet_away_spread",
    "bet_away_ml",
    "bet_over",
    "bet_under",
    "home_money_line",
    "away_money_line",
    "tie_money_line",
    "total_score",
    "over_odds",
    "under_odds",
    "home_spread",
    "home_spread_odds",
    "away_spread",
    "away_spread_odds",
    "timestamp",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PickError {
    #[error("Row {row}: missing game_id")]
    MissingGameId { row: usize },

    #[error("Row {row}: invalid {column} value {value:?}")]
    InvalidField {
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("Pick {game_id} '{pick}': no market indicator set")]
    NoMarket { game_id: String, pick: String },

    #[error("Pick {game_id} '{pick}': both sides of the {market} market set")]
    ConflictingSides {
        game_id: String,
        pick: String,
        market: &'static str,
    },

    #[error("Pick {game_id} '{pick}': more than one market indicator set")]
    MultipleMarkets { game_id: String, pick: String },
}

/// `<picks_dir>/<sport>_bets_<model>.txt`
pub fn picks_path(picks_dir: &Path, sport: &str, model: &str) -> PathBuf {
    picks_dir.join(format!("{}_bets_{}.txt", sport, model))
}

/// Load a model's picks file. A missing file is an error for that model; rows that
/// fail to parse are returned alongside the good picks.
pub fn load_picks(path: &Path, model: &str) -> Result<(Vec<Pick>, Vec<PickError>)> {
    if !path.is_file() {
        anyhow::bail!("Picks file not found at {}", path.display());
    }

    let table = CsvTable::read(path)
        .with_context(|| format!("Failed to load picks for model {}", model))?;

    for column in PICKS_COLUMNS {
        if !table.has_column(column) {
            warn!("Picks file {} has no '{}' column", path.display(), column);
        }
    }

    Ok(parse_picks(&table, model))
}

pub fn parse_picks(table: &CsvTable, model: &str) -> (Vec<Pick>, Vec<PickError>) {
    let mut picks = Vec::new();
    let mut errors = Vec::new();

    for (i, row) in table.rows().enumerate() {
        match parse_pick_row(&row, i + 1, model) {
            Ok(pick) => picks.push(pick),
            Err(e) => {
                warn!("{}", e);
                errors.push(e);
            }
        }
    }

    (picks, errors)
}

fn number(row: &CsvRow<'_>, idx: usize, column: &'static str) -> Result<Option<f64>, PickError> {
    match row.get(column).and_then(Value::parse) {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(Some(n)),
        Some(Value::Text(t)) => Err(PickError::InvalidField { row: idx, column, value: t }),
    }
}

fn flag(row: &CsvRow<'_>, idx: usize, column: &'static str) -> Result<bool, PickError> {
    match row.get(column).map(str::to_ascii_lowercase).as_deref() {
        None | Some("0") | Some("0.0") | Some("false") => Ok(false),
        Some("1") | Some("1.0") | Some("true") => Ok(true),
        Some(other) => Err(PickError::InvalidField {
            row: idx,
            column,
            value: other.to_string(),
        }),
    }
}

fn text(row: &CsvRow<'_>, column: &str) -> String {
    row.get(column).unwrap_or_default().to_string()
}

fn parse_pick_row(row: &CsvRow<'_>, idx: usize, model: &str) -> Result<Pick, PickError> {
    let game_id = row
        .get("game_id")
        .and_then(normalize_game_id)
        .ok_or(PickError::MissingGameId { row: idx })?;

    let rank = number(row, idx, "rank")?.map(|r| r as u32).unwrap_or(idx as u32);

    let units = match number(row, idx, "units")? {
        Some(u) if u > 0.0 => u,
        other => {
            return Err(PickError::InvalidField {
                row: idx,
                column: "units",
                value: other.map(|u| u.to_string()).unwrap_or_default(),
            })
        }
    };

    Ok(Pick {
        model: model.to_string(),
        rank,
        game_id,
        start_time: text(row, "start_time"),
        match_label: text(row, "match"),
        pick: text(row, "pick"),
        odds: number(row, idx, "odds")?,
        units,
        confidence_pct: number(row, idx, "confidence_pct")?,
        reason: text(row, "reason"),
        predicted_score: text(row, "predicted_score"),
        bet_home_spread: flag(row, idx, "bet_home_spread")?,
        bet_home_ml: flag(row, idx, "bet_home_ml")?,
        bet_away_spread: flag(row, idx, "bet_away_spread")?,
        bet_away_ml: flag(row, idx, "bet_away_ml")?,
        bet_over: flag(row, idx, "bet_over")?,
        bet_under: flag(row, idx, "bet_under")?,
        home_money_line: number(row, idx, "home_money_line")?,
        away_money_line: number(row, idx, "away_money_line")?,
        tie_money_line: number(row, idx, "tie_money_line")?,
        total_score: number(row, idx, "total_score")?,
        over_odds: number(row, idx, "over_odds")?,
        under_odds: number(row, idx, "under_odds")?,
        home_spread: number(row, idx, "home_spread")?,
        home_spread_odds: number(row, idx, "home_spread_odds")?,
        away_spread: number(row, idx, "away_spread")?,
        away_spread_odds: number(row, idx, "away_spread_odds")?,
        timestamp: text(row, "timestamp"),
    })
}

impl Pick {
    /// Resolve the six indicator flags to exactly one market side.
    pub fn market(&self) -> Result<Market, PickError> {
        let pairs = [
            ("spread", self.bet_home_spread, self.bet_away_spread),
            ("moneyline", self.bet_home_ml, self.bet_away_ml),
            ("total", self.bet_over, self.bet_under),
        ];

        if let Some((market, _, _)) = pairs.iter().find(|(_, a, b)| *a && *b) {
            return Err(PickError::ConflictingSides {
                game_id: self.game_id.clone(),
                pick: self.pick.clone(),
                market: *market,
            });
        }

        let selected: Vec<Market> = [
            (self.bet_home_spread, Market::Spread(Side::Home)),
            (self.bet_away_spread, Market::Spread(Side::Away)),
            (self.bet_home_ml, Market::Moneyline(Side::Home)),
            (self.bet_away_ml, Market::Moneyline(Side::Away)),
            (self.bet_over, Market::Total(TotalSide::Over)),
            (self.bet_under, Market::Total(TotalSide::Under)),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .map(|(_, m)| m)
        .collect();

        match selected.as_slice() {
            [market] => Ok(*market),
            [] => Err(PickError::NoMarket {
                game_id: self.game_id.clone(),
                pick: self.pick.clone(),
            }),
            _ => Err(PickError::MultipleMarkets {
                game_id: self.game_id.clone(),
                pick: self.pick.clone(),
            }),
        }
    }

    pub fn start_time_utc(&self) -> Result<DateTime<Utc>, TimestampError> {
        parse_timestamp(&self.start_time)
    }

    /// Local `YYYYMMDD` date of the game's start.
    pub fn local_date(&self, tz: Tz) -> Result<String, TimestampError> {
        Ok(local_date_key(self.start_time_utc()?, tz))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "rank,game_id,start_time,match,pick,odds,units,confidence_pct,reason,predicted_score,bet_home_spread,bet_home_ml,bet_away_spread,bet_away_ml,bet_over,bet_under,home_money_line,away_money_line,tie_money_line,total_score,over_odds,under_odds,home_spread,home_spread_odds,away_spread,away_spread_odds,timestamp\u{200b}";

    fn table(rows: &[&str]) -> CsvTable {
        let mut text = HEADER.to_string();
        for r in rows {
            text.push('\n');
            text.push_str(r);
        }
        CsvTable::parse(&text)
    }

    #[test]
    fn test_parse_full_pick_row() {
        let t = table(&[
            "1,261702,2025-10-31T00:00:00.000Z,Thunder vs Wizards,Thunder -15.5,-110,3,96,\"Rest, depth\",126-108,1,0,0,0,0,0,-1200,750,N/A,231.5,-110,-109,-15.5,-110,15.5,-110,2025-10-30T18:30:00Z\u{200b}",
        ]);
        let (picks, errors) = parse_picks(&t, "v2");

        assert!(errors.is_empty());
        let p = &picks[0];
        assert_eq!(p.model, "v2");
        assert_eq!(p.game_id, "261702");
        assert_eq!(p.reason, "Rest, depth");
        assert_eq!(p.odds, Some(-110.0));
        assert_eq!(p.tie_money_line, None);
        assert_eq!(p.timestamp, "2025-10-30T18:30:00Z");
        assert_eq!(p.market().unwrap(), Market::Spread(Side::Home));
    }

    #[test]
    fn test_bad_rows_are_reported_not_fatal() {
        let t = table(&[
            "1,,2025-10-31T00:00:00Z,A vs B,A ML,-110,1,70,r,1-0,0,1,0,0,0,0,,,,,,,,,,,",
            "2,7,2025-10-31T00:00:00Z,A vs B,A ML,-110,lots,70,r,1-0,0,1,0,0,0,0,,,,,,,,,,,",
            "3,8,2025-10-31T00:00:00Z,A vs B,A ML,-110,2,70,r,1-0,0,1,0,0,0,0,,,,,,,,,,,",
        ]);
        let (picks, errors) = parse_picks(&t, "v2");

        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].game_id, "8");
        assert_eq!(errors[0], PickError::MissingGameId { row: 1 });
        assert!(matches!(errors[1], PickError::InvalidField { column: "units", .. }));
    }

    #[test]
    fn test_market_validation() {
        let mut pick = Pick { game_id: "1".into(), units: 1.0, ..Default::default() };
        assert!(matches!(pick.market(), Err(PickError::NoMarket { .. })));

        pick.bet_over = true;
        assert_eq!(pick.market().unwrap(), Market::Total(TotalSide::Over));

        pick.bet_under = true;
        assert!(matches!(pick.market(), Err(PickError::ConflictingSides { market: "total", .. })));

        pick.bet_under = false;
        pick.bet_away_ml = true;
        assert!(matches!(pick.market(), Err(PickError::MultipleMarkets { .. })));
    }

    #[test]
    fn test_local_date() {
        let pick = Pick {
            start_time: "2025-11-01T02:00:00.000Z".into(),
            ..Default::default()
        };
        assert_eq!(pick.local_date(chrono_tz::America::Los_Angeles).unwrap(), "20251031");
    }

    #[test]
    fn test_missing_picks_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = picks_path(dir.path(), "nba", "gemini");
        assert!(load_picks(&path, "gemini").is_err());
    }
}

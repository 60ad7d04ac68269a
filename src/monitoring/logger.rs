use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use crate::data::csv_table::join_row;
use crate::evaluation::types::EvaluatedBet;

/// Column order of the evaluated-bets CSV: the picks schema, then grading fields.
pub const EVALUATED_COLUMNS: [&str; 36] = [
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
    "model",
    "date",
    "status",
    "home_score",
    "away_score",
    "bet_result",
    "bet_payout",
    "graded_at",
    "sport",
];

fn opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn bet_fields(bet: &EvaluatedBet, sport: &str) -> Vec<String> {
    let p = &bet.pick;
    vec![
        p.rank.to_string(),
        p.game_id.clone(),
        p.start_time.clone(),
        p.match_label.clone(),
        p.pick.clone(),
        opt(p.odds),
        p.units.to_string(),
        opt(p.confidence_pct),
        p.reason.clone(),
        p.predicted_score.clone(),
        flag(p.bet_home_spread),
        flag(p.bet_home_ml),
        flag(p.bet_away_spread),
        flag(p.bet_away_ml),
        flag(p.bet_over),
        flag(p.bet_under),
        opt(p.home_money_line),
        opt(p.away_money_line),
        opt(p.tie_money_line),
        opt(p.total_score),
        opt(p.over_odds),
        opt(p.under_odds),
        opt(p.home_spread),
        opt(p.home_spread_odds),
        opt(p.away_spread),
        opt(p.away_spread_odds),
        p.timestamp.clone(),
        p.model.clone(),
        bet.date.clone(),
        bet.status.clone(),
        bet.home_score.to_string(),
        bet.away_score.to_string(),
        bet.outcome.to_string(),
        format!("{:.4}", bet.payout),
        bet.graded_at.to_rfc3339(),
        sport.to_string(),
    ]
}

/// Render bets as CSV text with a header row.
pub fn render_bets_csv(bets: &[EvaluatedBet], sport: &str) -> String {
    let mut out = join_row(EVALUATED_COLUMNS);
    out.push('\n');
    for bet in bets {
        out.push_str(&join_row(bet_fields(bet, sport)));
        out.push('\n');
    }
    out
}

/// Append-only CSV mirror of a sport's evaluated-bets ledger.
pub struct CsvLogger {
    log_path: PathBuf,
    sport: String,
}

impl CsvLogger {
    pub fn new(log_path: PathBuf, sport: &str) -> Result<Self> {
        // Create CSV file with headers if it doesn't exist
        if !log_path.exists() {
            if let Some(parent) = log_path.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&log_path)
                .with_context(|| format!("Failed to create ledger CSV: {}", log_path.display()))?;

            writeln!(file, "{}", join_row(EVALUATED_COLUMNS))?;
        }

        Ok(Self {
            log_path,
            sport: sport.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Append graded bets
    pub fn log_bets(&self, bets: &[EvaluatedBet]) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.log_path)?;

        for bet in bets {
            writeln!(file, "{}", join_row(bet_fields(bet, &self.sport)))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::csv_table::CsvTable;
    use crate::evaluation::types::{Outcome, Pick};
    use chrono::Utc;

    fn bet() -> EvaluatedBet {
        EvaluatedBet {
            pick: Pick {
                model: "v2".into(),
                rank: 1,
                game_id: "42".into(),
                match_label: "Lakers vs Celtics".into(),
                pick: "Lakers -4.5".into(),
                odds: Some(-110.0),
                units: 2.0,
                reason: "Pace, rest".into(),
                bet_home_spread: true,
                ..Default::default()
            },
            date: "20251031".into(),
            status: "complete".into(),
            home_score: 110.0,
            away_score: 100.0,
            outcome: Outcome::Win,
            payout: 2.0 * 100.0 / 110.0,
            graded_at: Utc::now(),
        }
    }

    #[test]
    fn test_logger_appends_under_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evaluated").join("nba_bet_picks_evaluated.csv");

        let logger = CsvLogger::new(path.clone(), "nba").unwrap();
        logger.log_bets(&[bet()]).unwrap();
        let logger = CsvLogger::new(path.clone(), "nba").unwrap();
        logger.log_bets(&[bet()]).unwrap();

        let table = CsvTable::read(&path).unwrap();
        assert_eq!(table.len(), 2);
        let row = table.rows().next().unwrap();
        assert_eq!(row.get("reason"), Some("Pace, rest"));
        assert_eq!(row.get("bet_result"), Some("win"));
        assert_eq!(row.get("bet_payout"), Some("1.8182"));
        assert_eq!(row.get("tie_money_line"), None);
    }

    #[test]
    fn test_render_bets_csv() {
        let csv = render_bets_csv(&[bet()], "nba");
        let table = CsvTable::parse(&csv);
        assert_eq!(table.headers().len(), EVALUATED_COLUMNS.len());
        assert_eq!(table.rows().next().unwrap().get("model"), Some("v2"));
    }
}

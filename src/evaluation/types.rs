use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Home,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalSide {
    Over,
    Under,
}

/// The single market side a pick targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Market {
    Moneyline(Side),
    Spread(Side),
    Total(TotalSide),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Loss,
    /// Tie against the line; stake returned.
    Push,
    /// Market not offered for the result that happened (moneyline draw).
    Void,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Win => "win",
            Outcome::Loss => "loss",
            Outcome::Push => "push",
            Outcome::Void => "void",
        }
    }

    /// Whether the wagered units count as risked in ROI.
    pub fn is_decided(&self) -> bool {
        matches!(self, Outcome::Win | Outcome::Loss)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "win" => Ok(Outcome::Win),
            "loss" => Ok(Outcome::Loss),
            "push" => Ok(Outcome::Push),
            "void" => Ok(Outcome::Void),
            other => Err(format!("Unknown outcome: {}", other)),
        }
    }
}

/// One LLM-authored bet recommendation, field-exact with the picks files.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pick {
    pub model: String,
    pub rank: u32,
    pub game_id: String,
    pub start_time: String,
    pub match_label: String,
    pub pick: String,
    pub odds: Option<f64>,
    pub units: f64,
    pub confidence_pct: Option<f64>,
    pub reason: String,
    pub predicted_score: String,
    pub bet_home_spread: bool,
    pub bet_home_ml: bool,
    pub bet_away_spread: bool,
    pub bet_away_ml: bool,
    pub bet_over: bool,
    pub bet_under: bool,
    pub home_money_line: Option<f64>,
    pub away_money_line: Option<f64>,
    pub tie_money_line: Option<f64>,
    pub total_score: Option<f64>,
    pub over_odds: Option<f64>,
    pub under_odds: Option<f64>,
    pub home_spread: Option<f64>,
    pub home_spread_odds: Option<f64>,
    pub away_spread: Option<f64>,
    pub away_spread_odds: Option<f64>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameResult {
    pub game_id: String,
    pub status: String,
    pub home_score: Option<f64>,
    pub away_score: Option<f64>,
    pub start_time: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl GameResult {
    pub fn is_complete(&self) -> bool {
        self.status == "complete"
    }
}

/// A graded pick as stored in the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedBet {
    pub pick: Pick,
    /// Local `YYYYMMDD` date of the game.
    pub date: String,
    pub status: String,
    pub home_score: f64,
    pub away_score: f64,
    pub outcome: Outcome,
    pub payout: f64,
    pub graded_at: DateTime<Utc>,
}

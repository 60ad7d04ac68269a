use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use regex::Regex;
use std::collections::HashMap;
use tracing::{info, warn};
use crate::evaluation::picks::PickError;
use crate::evaluation::types::{EvaluatedBet, GameResult, Market, Outcome, Pick, Side, TotalSide};
use crate::storage::persistence::BettingDatabase;

#[derive(Debug, thiserror::Error)]
pub enum GradeError {
    #[error(transparent)]
    Pick(#[from] PickError),

    #[error("Pick {game_id} '{pick}': no odds")]
    MissingOdds { game_id: String, pick: String },

    #[error("Pick {game_id} '{pick}': invalid American odds {odds}")]
    InvalidOdds { game_id: String, pick: String, odds: f64 },

    #[error("Pick {game_id} '{pick}': no {market} line in description or columns")]
    MissingLine {
        game_id: String,
        pick: String,
        market: &'static str,
    },

    #[error("Game {0}: result is complete but has no final score")]
    MissingScore(String),

    #[error("Pick {game_id}: unparseable start time {value:?}")]
    BadStartTime { game_id: String, value: String },

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

/// Net units won or lost for a graded bet.
pub fn payout(odds: f64, units: f64, outcome: Outcome) -> f64 {
    match outcome {
        Outcome::Win if odds > 0.0 => units * odds / 100.0,
        Outcome::Win => units * 100.0 / odds.abs(),
        Outcome::Loss => -units,
        Outcome::Push | Outcome::Void => 0.0,
    }
}

fn validate_odds(pick: &Pick) -> Result<f64, GradeError> {
    let odds = pick.odds.ok_or_else(|| GradeError::MissingOdds {
        game_id: pick.game_id.clone(),
        pick: pick.pick.clone(),
    })?;

    if odds.abs() < 100.0 {
        return Err(GradeError::InvalidOdds {
            game_id: pick.game_id.clone(),
            pick: pick.pick.clone(),
            odds,
        });
    }

    Ok(odds)
}

/// First handicap token after the team name, e.g. "Lakers -4.5" or "Bulls PK".
/// Lines are signed, so "Schalke 04 +1" reads +1; tokens of 100 or more are
/// American odds ("Lakers -4.5 -110"), not lines.
fn spread_from_description(description: &str) -> Result<Option<f64>, GradeError> {
    let re = Regex::new(r"(?i)^\(?([+-]\d+(?:\.\d+)?|pk|pick'?em)\)?,?$")?;

    for token in description.split_whitespace().skip(1) {
        let Some(cap) = re.captures(token) else {
            continue;
        };

        let value = &cap[1];
        if value.eq_ignore_ascii_case("pk") || value.to_ascii_lowercase().starts_with("pick") {
            return Ok(Some(0.0));
        }
        match value.parse::<f64>() {
            Ok(line) if line.abs() < 100.0 => return Ok(Some(line)),
            _ => continue,
        }
    }

    Ok(None)
}

/// Line in an over/under description, e.g. "Over 220.5" or "U 6".
fn total_from_description(description: &str) -> Result<Option<f64>, GradeError> {
    let re = Regex::new(r"(?i)\b(?:over|under|o|u)\s*(\d+(?:\.\d+)?)")?;

    Ok(re
        .captures(description)
        .and_then(|cap| cap[1].parse::<f64>().ok()))
}

fn compare(value: f64) -> Outcome {
    if value.abs() < 1e-9 {
        Outcome::Push
    } else if value > 0.0 {
        Outcome::Win
    } else {
        Outcome::Loss
    }
}

fn side_scores(side: Side, home: f64, away: f64) -> (f64, f64) {
    match side {
        Side::Home => (home, away),
        Side::Away => (away, home),
    }
}

/// Grade one pick against a complete result.
pub fn grade_pick(pick: &Pick, result: &GameResult) -> Result<(Outcome, f64), GradeError> {
    let market = pick.market()?;
    let odds = validate_odds(pick)?;

    let (home, away) = match (result.home_score, result.away_score) {
        (Some(h), Some(a)) => (h, a),
        _ => return Err(GradeError::MissingScore(result.game_id.clone())),
    };

    let outcome = match market {
        Market::Moneyline(side) => {
            let (picked, opponent) = side_scores(side, home, away);
            match compare(picked - opponent) {
                // No draw market, so a draw voids a two-way moneyline bet
                Outcome::Push => Outcome::Void,
                other => other,
            }
        }
        Market::Spread(side) => {
            let column = match side {
                Side::Home => pick.home_spread,
                Side::Away => pick.away_spread,
            };
            let line = spread_from_description(&pick.pick)?
                .or(column)
                .ok_or_else(|| GradeError::MissingLine {
                    game_id: pick.game_id.clone(),
                    pick: pick.pick.clone(),
                    market: "spread",
                })?;

            let (picked, opponent) = side_scores(side, home, away);
            compare(picked + line - opponent)
        }
        Market::Total(total_side) => {
            let line = total_from_description(&pick.pick)?
                .or(pick.total_score)
                .ok_or_else(|| GradeError::MissingLine {
                    game_id: pick.game_id.clone(),
                    pick: pick.pick.clone(),
                    market: "total",
                })?;

            let diff = home + away - line;
            match total_side {
                TotalSide::Over => compare(diff),
                TotalSide::Under => compare(-diff),
            }
        }
    };

    Ok((outcome, payout(odds, pick.units, outcome)))
}

#[derive(Debug, Default)]
pub struct GradeReport {
    pub graded: Vec<EvaluatedBet>,
    /// Game ids still waiting on a complete result.
    pub pending: Vec<String>,
    pub rejected: Vec<GradeError>,
}

/// Grade every pick whose game has a complete result. Picks without one stay
/// pending; picks that can't be graded are reported in `rejected`.
pub fn grade_picks(
    picks: &[Pick],
    results: &[GameResult],
    tz: Tz,
    graded_at: DateTime<Utc>,
) -> GradeReport {
    let by_game: HashMap<&str, &GameResult> =
        results.iter().map(|r| (r.game_id.as_str(), r)).collect();

    let mut report = GradeReport::default();

    for pick in picks {
        let result = match by_game.get(pick.game_id.as_str()) {
            Some(r) if r.is_complete() => *r,
            _ => {
                report.pending.push(pick.game_id.clone());
                continue;
            }
        };

        let graded = grade_pick(pick, result).and_then(|(outcome, payout)| {
            let date = pick.local_date(tz).map_err(|_| GradeError::BadStartTime {
                game_id: pick.game_id.clone(),
                value: pick.start_time.clone(),
            })?;
            Ok(EvaluatedBet {
                pick: pick.clone(),
                date,
                status: result.status.clone(),
                home_score: result.home_score.unwrap_or_default(),
                away_score: result.away_score.unwrap_or_default(),
                outcome,
                payout,
                graded_at,
            })
        });

        match graded {
            Ok(bet) => report.graded.push(bet),
            Err(e) => {
                warn!("Skipping pick: {}", e);
                report.rejected.push(e);
            }
        }
    }

    report
}

/// Grade picks and append them to the sport's ledger. Returns the bets this run
/// added to the ledger and the sport's full ledger afterwards.
pub fn grade(
    db: &BettingDatabase,
    picks: &[Pick],
    results: &[GameResult],
    sport: &str,
    tz: Tz,
    graded_at: DateTime<Utc>,
) -> Result<(Vec<EvaluatedBet>, Vec<EvaluatedBet>)> {
    let report = grade_picks(picks, results, tz, graded_at);

    let appended = db.append_evaluated(sport, &report.graded)?;
    info!(
        "Graded {} picks ({} new in ledger, {} pending, {} rejected)",
        report.graded.len(),
        appended.len(),
        report.pending.len(),
        report.rejected.len()
    );

    let history = db.load_evaluated(sport, None)?;
    Ok((appended, history))
}

/// Ledger rows whose stored final score no longer matches the results table.
/// The ledger is never re-graded; these are surfaced as warnings only.
pub fn find_score_drift<'a>(history: &'a [EvaluatedBet], results: &[GameResult]) -> Vec<&'a EvaluatedBet> {
    let by_game: HashMap<&str, &GameResult> =
        results.iter().map(|r| (r.game_id.as_str(), r)).collect();

    history
        .iter()
        .filter(|bet| match by_game.get(bet.pick.game_id.as_str()) {
            Some(r) if r.is_complete() => {
                r.home_score != Some(bet.home_score) || r.away_score != Some(bet.away_score)
            }
            _ => false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(game: &str, status: &str, home: f64, away: f64) -> GameResult {
        GameResult {
            game_id: game.to_string(),
            status: status.to_string(),
            home_score: Some(home),
            away_score: Some(away),
            start_time: None,
            fetched_at: Utc::now(),
        }
    }

    fn pick(game: &str, description: &str, odds: f64, units: f64) -> Pick {
        Pick {
            model: "v2".into(),
            rank: 1,
            game_id: game.into(),
            start_time: "2025-11-01T02:00:00.000Z".into(),
            pick: description.into(),
            odds: Some(odds),
            units,
            ..Default::default()
        }
    }

    #[test]
    fn test_payout_from_american_odds() {
        assert!((payout(150.0, 2.0, Outcome::Win) - 3.0).abs() < 1e-9);
        assert!((payout(-120.0, 3.0, Outcome::Win) - 2.5).abs() < 1e-9);
        assert_eq!(payout(-120.0, 3.0, Outcome::Loss), -3.0);
        assert_eq!(payout(150.0, 2.0, Outcome::Loss), -2.0);
        assert_eq!(payout(-110.0, 2.0, Outcome::Push), 0.0);
        assert_eq!(payout(-110.0, 2.0, Outcome::Void), 0.0);
    }

    #[test]
    fn test_home_spread_win_end_to_end() {
        let mut p = pick("42", "Lakers -4.5", -110.0, 2.0);
        p.bet_home_spread = true;

        let (outcome, paid) = grade_pick(&p, &result("42", "complete", 110.0, 100.0)).unwrap();
        assert_eq!(outcome, Outcome::Win);
        assert!((paid - 2.0 * 100.0 / 110.0).abs() < 1e-9);
    }

    #[test]
    fn test_whole_point_spread_push() {
        let mut p = pick("7", "Lakers -3", -110.0, 2.0);
        p.bet_home_spread = true;

        let (outcome, paid) = grade_pick(&p, &result("7", "complete", 100.0, 97.0)).unwrap();
        assert_eq!(outcome, Outcome::Push);
        assert_eq!(paid, 0.0);
    }

    #[test]
    fn test_away_spread_uses_column_when_description_has_no_line() {
        let mut p = pick("7", "Celtics cover", -105.0, 1.0);
        p.bet_away_spread = true;
        p.away_spread = Some(6.5);

        // Celtics lose by 5, +6.5 covers
        let (outcome, _) = grade_pick(&p, &result("7", "complete", 105.0, 100.0)).unwrap();
        assert_eq!(outcome, Outcome::Win);
    }

    #[test]
    fn test_moneyline_and_draw() {
        let mut p = pick("9", "Arsenal ML", 150.0, 2.0);
        p.bet_away_ml = true;

        assert_eq!(grade_pick(&p, &result("9", "complete", 0.0, 1.0)).unwrap(), (Outcome::Win, 3.0));
        assert_eq!(grade_pick(&p, &result("9", "complete", 2.0, 1.0)).unwrap(), (Outcome::Loss, -2.0));
        assert_eq!(grade_pick(&p, &result("9", "complete", 1.0, 1.0)).unwrap(), (Outcome::Void, 0.0));
    }

    #[test]
    fn test_totals() {
        let mut over = pick("5", "Over 220.5", -110.0, 1.0);
        over.bet_over = true;
        let mut under = pick("5", "Under", -110.0, 1.0);
        under.bet_under = true;
        under.total_score = Some(221.0);

        let r = result("5", "complete", 111.0, 110.0);
        assert_eq!(grade_pick(&over, &r).unwrap().0, Outcome::Win);
        assert_eq!(grade_pick(&under, &r).unwrap().0, Outcome::Push);
    }

    #[test]
    fn test_spread_description_parsing() {
        assert_eq!(spread_from_description("Thunder -15.5").unwrap(), Some(-15.5));
        assert_eq!(spread_from_description("Wizards +15.5").unwrap(), Some(15.5));
        assert_eq!(spread_from_description("Bulls PK").unwrap(), Some(0.0));
        assert_eq!(spread_from_description("Lakers -4.5 (-110)").unwrap(), Some(-4.5));
        assert_eq!(spread_from_description("Lakers").unwrap(), None);
        assert_eq!(spread_from_description("76ers -2.5").unwrap(), Some(-2.5));
    }

    #[test]
    fn test_spread_ignores_trailing_odds() {
        assert_eq!(spread_from_description("Lakers -4.5 -110").unwrap(), Some(-4.5));
        assert_eq!(spread_from_description("Lakers -4.5 @ -110").unwrap(), Some(-4.5));
        assert_eq!(spread_from_description("Bulls PK -105").unwrap(), Some(0.0));
        assert_eq!(spread_from_description("Celtics -110").unwrap(), None);
        assert_eq!(spread_from_description("Schalke 04 +1").unwrap(), Some(1.0));

        let mut p = pick("42", "Lakers -4.5 -110", -110.0, 2.0);
        p.bet_home_spread = true;
        p.home_spread = Some(-4.5);

        let (outcome, paid) = grade_pick(&p, &result("42", "complete", 110.0, 100.0)).unwrap();
        assert_eq!(outcome, Outcome::Win);
        assert!((paid - 1.818).abs() < 1e-3);
    }

    #[test]
    fn test_grade_picks_skips_pending_and_rejects_bad() {
        let mut good = pick("1", "Lakers -4.5", -110.0, 1.0);
        good.bet_home_spread = true;
        let mut scheduled = pick("2", "Over 200", -110.0, 1.0);
        scheduled.bet_over = true;
        let missing = {
            let mut p = pick("3", "Heat ML", -150.0, 1.0);
            p.bet_home_ml = true;
            p
        };
        let no_market = pick("4", "Knicks ML", -150.0, 1.0);

        let results = vec![
            result("1", "complete", 110.0, 100.0),
            result("2", "scheduled", 0.0, 0.0),
            result("4", "complete", 90.0, 80.0),
        ];

        let report = grade_picks(
            &[good, scheduled, missing, no_market],
            &results,
            chrono_tz::America::Los_Angeles,
            Utc::now(),
        );

        assert_eq!(report.graded.len(), 1);
        assert_eq!(report.graded[0].date, "20251031");
        assert_eq!(report.pending, vec!["2".to_string(), "3".to_string()]);
        assert!(matches!(report.rejected[0], GradeError::Pick(PickError::NoMarket { .. })));
    }

    #[test]
    fn test_invalid_odds_rejected() {
        let mut p = pick("1", "Lakers ML", 50.0, 1.0);
        p.bet_home_ml = true;
        assert!(matches!(
            grade_pick(&p, &result("1", "complete", 1.0, 0.0)),
            Err(GradeError::InvalidOdds { .. })
        ));
    }

    #[test]
    fn test_grade_appends_to_ledger_once() {
        let db = BettingDatabase::in_memory().unwrap();
        let mut p = pick("42", "Lakers -4.5", -110.0, 2.0);
        p.bet_home_spread = true;
        let results = vec![result("42", "complete", 110.0, 100.0)];
        let tz = chrono_tz::America::Los_Angeles;

        let (now, history) = grade(&db, &[p.clone()], &results, "nba", tz, Utc::now()).unwrap();
        assert_eq!(now.len(), 1);
        assert_eq!(history.len(), 1);

        let (now, history) = grade(&db, &[p], &results, "nba", tz, Utc::now()).unwrap();
        assert!(now.is_empty());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_score_drift_detection() {
        let mut p = pick("42", "Lakers -4.5", -110.0, 2.0);
        p.bet_home_spread = true;
        let report = grade_picks(
            &[p],
            &[result("42", "complete", 110.0, 100.0)],
            chrono_tz::UTC,
            Utc::now(),
        );

        let corrected = vec![result("42", "complete", 104.0, 100.0)];
        assert_eq!(find_score_drift(&report.graded, &corrected).len(), 1);

        let same = vec![result("42", "complete", 110.0, 100.0)];
        assert!(find_score_drift(&report.graded, &same).is_empty());
    }
}

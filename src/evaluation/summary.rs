use std::fmt;
use crate::evaluation::types::{EvaluatedBet, Outcome};

/// Win/loss and ROI accounting over a set of graded bets. Pushes and voids
/// return the stake, so they count toward neither win rate nor units risked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceSummary {
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub pushes: usize,
    pub voids: usize,
    pub units_risked: f64,
    pub net_units: f64,
}

impl PerformanceSummary {
    pub fn from_bets<'a, I>(bets: I) -> Self
    where
        I: IntoIterator<Item = &'a EvaluatedBet>,
    {
        let mut summary = Self::default();

        for bet in bets {
            summary.total += 1;
            match bet.outcome {
                Outcome::Win => summary.wins += 1,
                Outcome::Loss => summary.losses += 1,
                Outcome::Push => summary.pushes += 1,
                Outcome::Void => summary.voids += 1,
            }
            if bet.outcome.is_decided() {
                summary.units_risked += bet.pick.units;
            }
            summary.net_units += bet.payout;
        }

        summary
    }

    pub fn decided(&self) -> usize {
        self.wins + self.losses
    }

    /// Fraction of decided bets won.
    pub fn win_rate(&self) -> Option<f64> {
        match self.decided() {
            0 => None,
            n => Some(self.wins as f64 / n as f64),
        }
    }

    /// Net units over units risked.
    pub fn roi(&self) -> Option<f64> {
        if self.units_risked > 0.0 {
            Some(self.net_units / self.units_risked)
        } else {
            None
        }
    }
}

impl fmt::Display for PerformanceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bets ({}W-{}L-{}P-{}V) | win rate {} | {:+.2} units on {:.2} risked | ROI {}",
            self.total,
            self.wins,
            self.losses,
            self.pushes,
            self.voids,
            self.win_rate()
                .map(|w| format!("{:.1}%", w * 100.0))
                .unwrap_or_else(|| "n/a".to_string()),
            self.net_units,
            self.units_risked,
            self.roi()
                .map(|r| format!("{:+.1}%", r * 100.0))
                .unwrap_or_else(|| "n/a".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::grader::payout;
    use crate::evaluation::types::Pick;
    use chrono::Utc;

    fn bet(outcome: Outcome, odds: f64, units: f64) -> EvaluatedBet {
        EvaluatedBet {
            pick: Pick { odds: Some(odds), units, ..Default::default() },
            date: "20251031".into(),
            status: "complete".into(),
            home_score: 0.0,
            away_score: 0.0,
            outcome,
            payout: payout(odds, units, outcome),
            graded_at: Utc::now(),
        }
    }

    #[test]
    fn test_push_and_void_not_risked() {
        let bets = vec![
            bet(Outcome::Win, 150.0, 2.0),
            bet(Outcome::Loss, -110.0, 1.0),
            bet(Outcome::Push, -110.0, 3.0),
            bet(Outcome::Void, 120.0, 2.0),
        ];

        let s = PerformanceSummary::from_bets(&bets);
        assert_eq!(s.total, 4);
        assert_eq!(s.decided(), 2);
        assert!((s.units_risked - 3.0).abs() < 1e-9);
        assert!((s.net_units - 2.0).abs() < 1e-9);
        assert_eq!(s.win_rate(), Some(0.5));
        assert!((s.roi().unwrap() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_summary() {
        let none: Vec<EvaluatedBet> = Vec::new();
        let s = PerformanceSummary::from_bets(&none);
        assert_eq!(s.win_rate(), None);
        assert_eq!(s.roi(), None);
        assert!(s.to_string().contains("n/a"));
    }
}

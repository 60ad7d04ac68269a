use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use crate::data::csv_table::join_row;
use crate::data::sanitize::parse_timestamp;
use crate::data::types::{Snapshot, Value};
use crate::evaluation::types::EvaluatedBet;
use crate::lines::aggregator::AggregateRecord;
use crate::monitoring::logger::render_bets_csv;

/// The two tables a model's prompt is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptInput {
    pub games_csv: String,
    pub history_csv: String,
    pub game_count: usize,
}

/// Game ids from the latest scrape, soonest start first, capped at `max_games`.
pub fn select_upcoming(history: &[Snapshot], current_ids: &HashSet<String>, max_games: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut games: Vec<(Option<DateTime<Utc>>, String)> = Vec::new();

    for snapshot in history {
        if !current_ids.contains(&snapshot.game_id) || !seen.insert(snapshot.game_id.clone()) {
            continue;
        }
        games.push((parse_timestamp(&snapshot.start_time).ok(), snapshot.game_id.clone()));
    }

    // Unparseable start times sort last
    games.sort_by(|(a, ida), (b, idb)| match (a, b) {
        (Some(x), Some(y)) => x.cmp(y).then_with(|| ida.cmp(idb)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => ida.cmp(idb),
    });

    games.into_iter().take(max_games).map(|(_, id)| id).collect()
}

/// Keep games starting no later than `hours_ahead` from `now`.
pub fn within_window(rows: Vec<AggregateRecord>, now: DateTime<Utc>, hours_ahead: Option<i64>) -> Vec<AggregateRecord> {
    match hours_ahead {
        None => rows,
        Some(h) => {
            let cutoff = now + Duration::hours(h);
            rows.into_iter().filter(|r| r.start_time <= cutoff).collect()
        }
    }
}

/// "Lakers -4.5" style label from a team and its latest spread.
pub fn spread_label(team: &str, spread: Option<f64>) -> Option<String> {
    spread.map(|s| format!("{} {:+.1}", team, s))
}

fn cell(value: Option<&Value>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Aggregate table as CSV: identity columns, `<metric>_first/_avg/_last` per
/// metric, then the spread labels.
pub fn render_games_csv(rows: &[AggregateRecord], metric_keys: &[impl AsRef<str>]) -> String {
    let mut header: Vec<String> = ["game_id", "home_team", "away_team", "start_time", "snapshot_count"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for m in metric_keys {
        let m = m.as_ref();
        header.push(format!("{}_first", m));
        header.push(format!("{}_avg", m));
        header.push(format!("{}_last", m));
    }
    header.push("home_team_spread".to_string());
    header.push("away_team_spread".to_string());

    let mut out = join_row(&header);
    out.push('\n');

    for row in rows {
        let mut fields = vec![
            row.game_id.clone(),
            row.home_team.clone(),
            row.away_team.clone(),
            row.start_time.format("%Y-%m-%dT%H:%M:%S.000Z").to_string(),
            row.snapshot_count.to_string(),
        ];
        for m in metric_keys {
            match row.metric(m.as_ref()) {
                Some(s) => {
                    fields.push(cell(s.first.as_ref()));
                    fields.push(s.avg.map(|a| a.to_string()).unwrap_or_default());
                    fields.push(cell(s.last.as_ref()));
                }
                None => fields.extend([String::new(), String::new(), String::new()]),
            }
        }
        fields.push(spread_label(&row.home_team, row.last_f64("home_spread")).unwrap_or_default());
        fields.push(spread_label(&row.away_team, row.last_f64("away_spread")).unwrap_or_default());

        out.push_str(&join_row(&fields));
        out.push('\n');
    }

    out
}

pub fn build_prompt_input(
    rows: &[AggregateRecord],
    metric_keys: &[impl AsRef<str>],
    model_history: &[EvaluatedBet],
    sport: &str,
) -> PromptInput {
    PromptInput {
        games_csv: render_games_csv(rows, metric_keys),
        history_csv: render_bets_csv(model_history, sport),
        game_count: rows.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::csv_table::CsvTable;
    use crate::lines::aggregator::{aggregate, DEFAULT_GROUP_COLUMNS};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn snap(game: &str, start: &str, spread: f64) -> Snapshot {
        let mut metrics = BTreeMap::new();
        metrics.insert("home_spread".to_string(), Value::Number(spread));
        metrics.insert("away_spread".to_string(), Value::Number(-spread));
        Snapshot {
            game_id: game.into(),
            home_team: format!("Home{}", game),
            away_team: format!("Away{}", game),
            start_time: start.into(),
            scraped_at: "2025-10-31T08:00:00Z".into(),
            status: "scheduled".into(),
            metrics,
        }
    }

    #[test]
    fn test_select_upcoming_orders_and_caps() {
        let history = vec![
            snap("3", "2025-11-03T00:00:00Z", 1.0),
            snap("1", "2025-11-01T00:00:00Z", 1.0),
            snap("2", "2025-11-02T00:00:00Z", 1.0),
            snap("1", "2025-11-01T00:00:00Z", 2.0),
            snap("old", "2025-10-01T00:00:00Z", 1.0),
        ];
        let current: HashSet<String> = ["1", "2", "3"].iter().map(|s| s.to_string()).collect();

        assert_eq!(select_upcoming(&history, &current, 2), vec!["1", "2"]);
    }

    #[test]
    fn test_spread_label() {
        assert_eq!(spread_label("Thunder", Some(-15.5)), Some("Thunder -15.5".to_string()));
        assert_eq!(spread_label("Wizards", Some(15.0)), Some("Wizards +15.0".to_string()));
        assert_eq!(spread_label("Wizards", None), None);
    }

    #[test]
    fn test_window_and_render() {
        let records = vec![
            snap("1", "2025-11-01T00:00:00Z", -3.5),
            snap("2", "2025-11-01T05:00:00Z", 2.0),
        ];
        let metrics = ["home_spread", "away_spread"];
        let report = aggregate(&records, &DEFAULT_GROUP_COLUMNS, &metrics);

        let now = Utc.with_ymd_and_hms(2025, 10, 31, 23, 0, 0).unwrap();
        let rows = within_window(report.rows, now, Some(2));
        assert_eq!(rows.len(), 1);

        let input = build_prompt_input(&rows, &metrics, &[], "nba");
        assert_eq!(input.game_count, 1);

        let table = CsvTable::parse(&input.games_csv);
        let row = table.rows().next().unwrap();
        assert_eq!(row.get("home_spread_last"), Some("-3.5"));
        assert_eq!(row.get("home_team_spread"), Some("Home1 -3.5"));
        assert_eq!(row.get("away_team_spread"), Some("Away1 +3.5"));
        assert!(input.history_csv.starts_with("rank,game_id"));
    }
}

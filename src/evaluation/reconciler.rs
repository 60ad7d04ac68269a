use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tracing::{info, warn};
use crate::data::csv_table::{CsvRow, CsvTable};
use crate::data::sanitize::{local_date_key, parse_timestamp};
use crate::data::types::{normalize_game_id, Value};
use crate::evaluation::types::{GameResult, Pick};

/// What has to be fetched from the results provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchScope {
    /// Distinct local `YYYYMMDD` dates, sorted.
    pub dates: Vec<String>,
    pub missing_game_ids: Vec<String>,
    /// Missing picks whose start time couldn't be parsed, so no date could be derived.
    pub undated_game_ids: Vec<String>,
}

impl FetchScope {
    pub fn is_empty(&self) -> bool {
        self.missing_game_ids.is_empty()
    }
}

/// Left-join picks against known results. A pick is missing a result unless its
/// game's status is exactly `complete`.
pub fn reconcile(picks: &[Pick], existing: &[GameResult], tz: Tz) -> FetchScope {
    let by_game: HashMap<&str, &GameResult> =
        existing.iter().map(|r| (r.game_id.as_str(), r)).collect();

    let mut dates = BTreeSet::new();
    let mut scope = FetchScope::default();

    for pick in picks {
        let complete = by_game
            .get(pick.game_id.as_str())
            .map(|r| r.is_complete())
            .unwrap_or(false);
        if complete {
            continue;
        }

        if !scope.missing_game_ids.contains(&pick.game_id) {
            scope.missing_game_ids.push(pick.game_id.clone());
        }

        match pick.local_date(tz) {
            Ok(date) => {
                dates.insert(date);
            }
            Err(e) => {
                warn!("Pick for game {}: {}", pick.game_id, e);
                scope.undated_game_ids.push(pick.game_id.clone());
            }
        }
    }

    scope.dates = dates.into_iter().collect();
    scope
}

/// Merge freshly fetched results into the existing table, one row per game id.
/// The most recently fetched row wins; first-seen order is kept.
pub fn merge_results(existing: Vec<GameResult>, fetched: Vec<GameResult>) -> Vec<GameResult> {
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, GameResult> = HashMap::new();

    for result in existing.into_iter().chain(fetched) {
        if !latest.contains_key(&result.game_id) {
            order.push(result.game_id.clone());
        }
        latest.insert(result.game_id.clone(), result);
    }

    order
        .into_iter()
        .filter_map(|id| latest.remove(&id))
        .collect()
}

/// The external game-results provider.
pub trait ResultsFeed {
    fn fetch_results(&self, sport: &str, dates: &[String]) -> Result<Vec<GameResult>>;
}

/// Reads results the fetcher dropped at `<dir>/<sport>_results.csv`, keeping rows
/// whose local game date was requested (rows without a start time are kept).
pub struct CsvResultsFeed {
    dir: PathBuf,
    tz: Tz,
}

impl CsvResultsFeed {
    pub fn new(dir: PathBuf, tz: Tz) -> Self {
        Self { dir, tz }
    }
}

impl ResultsFeed for CsvResultsFeed {
    fn fetch_results(&self, sport: &str, dates: &[String]) -> Result<Vec<GameResult>> {
        let path = self.dir.join(format!("{}_results.csv", sport));
        if !path.is_file() {
            info!("No fetched results at {}", path.display());
            return Ok(Vec::new());
        }

        let table = CsvTable::read(&path)?;
        let fetched_at = Utc::now();

        let results = table
            .rows()
            .filter_map(|row| parse_result_row(&row, fetched_at))
            .filter(|r| match r.start_time.as_deref().map(parse_timestamp) {
                Some(Ok(ts)) => dates.contains(&local_date_key(ts, self.tz)),
                _ => true,
            })
            .collect();

        Ok(results)
    }
}

fn score(row: &CsvRow<'_>, column: &str) -> Option<f64> {
    row.get(column).and_then(Value::parse).and_then(|v| v.as_f64())
}

/// Parse a results row; rows without a game id are dropped.
pub fn parse_result_row(row: &CsvRow<'_>, fetched_at: DateTime<Utc>) -> Option<GameResult> {
    let game_id = normalize_game_id(row.get("game_id")?)?;

    Some(GameResult {
        game_id,
        status: row.get("status").unwrap_or_default().to_string(),
        home_score: score(row, "home_score"),
        away_score: score(row, "away_score"),
        start_time: row.get("start_time").map(str::to_string),
        fetched_at,
    })
}

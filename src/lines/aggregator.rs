use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::warn;
use crate::data::sanitize::parse_timestamp;
use crate::data::types::{Record, Snapshot, Value};

pub const DEFAULT_GROUP_COLUMNS: [&str; 4] = ["game_id", "home_team", "away_team", "start_time"];

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSummary {
    pub first: Option<Value>,
    /// Mean of the numeric values, rounded to 2 decimals.
    pub avg: Option<f64>,
    pub last: Option<Value>,
}

/// First/average/last view of one game's snapshot history.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRecord {
    pub game_id: String,
    pub home_team: String,
    pub away_team: String,
    pub start_time: DateTime<Utc>,
    pub snapshot_count: usize,
    /// In the order the metrics were requested.
    pub metrics: Vec<(String, MetricSummary)>,
}

impl AggregateRecord {
    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.iter().find(|(m, _)| m == name).map(|(_, s)| s)
    }

    pub fn last_f64(&self, name: &str) -> Option<f64> {
        self.metric(name)?.last.as_ref()?.as_f64()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregateError {
    #[error("Game {game_id}: malformed {column} timestamp {value:?}")]
    MalformedTimestamp {
        game_id: String,
        column: &'static str,
        value: String,
    },
}

#[derive(Debug, Default)]
pub struct AggregateReport {
    pub rows: Vec<AggregateRecord>,
    pub errors: Vec<AggregateError>,
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn group_key(snapshot: &Snapshot, group_keys: &[impl AsRef<str>]) -> Vec<String> {
    group_keys
        .iter()
        .map(|k| snapshot.field(k.as_ref()).map(|v| v.to_string()).unwrap_or_default())
        .collect()
}

/// Group snapshots by `group_keys` and summarise each metric as first/avg/last.
/// Groups with an unparseable start or scrape timestamp are reported in
/// `errors` instead of producing a row. Rows are sorted by start time.
pub fn aggregate<K, M>(records: &[Snapshot], group_keys: &[K], metric_keys: &[M]) -> AggregateReport
where
    K: AsRef<str>,
    M: AsRef<str>,
{
    let mut order: Vec<Vec<String>> = Vec::new();
    let mut groups: HashMap<Vec<String>, Vec<&Snapshot>> = HashMap::new();

    for snapshot in records {
        let key = group_key(snapshot, group_keys);
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(snapshot);
    }

    let mut report = AggregateReport::default();

    for key in order {
        let Some(members) = groups.remove(&key) else {
            continue;
        };

        match summarise_group(&members, metric_keys) {
            Ok(row) => report.rows.push(row),
            Err(e) => {
                warn!("{}", e);
                report.errors.push(e);
            }
        }
    }

    report
        .rows
        .sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.game_id.cmp(&b.game_id)));
    report
}

fn summarise_group<M: AsRef<str>>(
    members: &[&Snapshot],
    metric_keys: &[M],
) -> Result<AggregateRecord, AggregateError> {
    let mut timed = Vec::with_capacity(members.len());
    for snapshot in members {
        let scraped = parse_timestamp(&snapshot.scraped_at).map_err(|_| {
            AggregateError::MalformedTimestamp {
                game_id: snapshot.game_id.clone(),
                column: "date_scraped",
                value: snapshot.scraped_at.clone(),
            }
        })?;
        timed.push((scraped, *snapshot));
    }
    // Stable: equal scrape times keep arrival order.
    timed.sort_by_key(|(ts, _)| *ts);

    let (_, latest) = timed[timed.len() - 1];
    let (_, earliest) = timed[0];

    let start_time = parse_timestamp(&latest.start_time).map_err(|_| {
        AggregateError::MalformedTimestamp {
            game_id: latest.game_id.clone(),
            column: "start_time",
            value: latest.start_time.clone(),
        }
    })?;

    let metrics = metric_keys
        .iter()
        .map(|m| {
            let name = m.as_ref();
            let numbers: Vec<f64> = timed
                .iter()
                .filter_map(|(_, s)| s.metrics.get(name).and_then(Value::as_f64))
                .collect();
            let avg = if numbers.is_empty() {
                None
            } else {
                Some(round2(numbers.iter().sum::<f64>() / numbers.len() as f64))
            };

            let summary = MetricSummary {
                first: earliest.metrics.get(name).cloned(),
                avg,
                last: latest.metrics.get(name).cloned(),
            };
            (name.to_string(), summary)
        })
        .collect();

    Ok(AggregateRecord {
        game_id: latest.game_id.clone(),
        home_team: latest.home_team.clone(),
        away_team: latest.away_team.clone(),
        start_time,
        snapshot_count: timed.len(),
        metrics,
    })
}

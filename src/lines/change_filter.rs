use serde::Deserialize;
use std::collections::HashMap;
use crate::data::types::{Record, Value};

/// How close two numeric metric values must be to count as "unchanged".
/// The default epsilon of 0.0 is exact equality.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeTolerance {
    #[serde(default)]
    pub default_epsilon: f64,
    #[serde(default)]
    pub per_metric: HashMap<String, f64>,
}

impl ChangeTolerance {
    pub fn exact() -> Self {
        Self::default()
    }

    pub fn with_epsilon(mut self, metric: &str, epsilon: f64) -> Self {
        self.per_metric.insert(metric.to_string(), epsilon);
        self
    }

    fn epsilon_for(&self, metric: &str) -> f64 {
        self.per_metric
            .get(metric)
            .copied()
            .unwrap_or(self.default_epsilon)
    }

    /// Null equals null and nothing else; numbers compare within the metric's epsilon.
    pub fn unchanged(&self, metric: &str, a: Option<&Value>, b: Option<&Value>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(Value::Number(x)), Some(Value::Number(y))) => {
                let eps = self.epsilon_for(metric);
                if eps <= 0.0 {
                    x == y
                } else {
                    (x - y).abs() <= eps
                }
            }
            (Some(Value::Text(x)), Some(Value::Text(y))) => x == y,
            _ => false,
        }
    }
}

fn key_part(value: Option<Value>) -> String {
    match value {
        None => "\u{0}".to_string(),
        Some(Value::Number(n)) => format!("n:{}", n),
        Some(Value::Text(s)) => format!("t:{}", s),
    }
}

/// Line-movement compression. Records are grouped by `dimension_keys` in arrival
/// order; the first of each group is kept, and a later record is kept only when
/// some metric differs from the last *kept* record of its group. Output keeps the
/// input's relative order.
pub fn filter_on_change<R, K, M>(
    records: Vec<R>,
    dimension_keys: &[K],
    metric_keys: &[M],
    tolerance: &ChangeTolerance,
) -> Vec<R>
where
    R: Record,
    K: AsRef<str>,
    M: AsRef<str>,
{
    let mut last_kept: HashMap<Vec<String>, Vec<Option<Value>>> = HashMap::new();
    let mut kept = Vec::with_capacity(records.len());

    for record in records {
        let key: Vec<String> = dimension_keys
            .iter()
            .map(|k| key_part(record.field(k.as_ref())))
            .collect();

        let metrics: Vec<Option<Value>> = metric_keys
            .iter()
            .map(|m| record.field(m.as_ref()))
            .collect();

        let changed = match last_kept.get(&key) {
            None => true,
            Some(previous) => metric_keys
                .iter()
                .zip(previous.iter().zip(metrics.iter()))
                .any(|(m, (prev, cur))| !tolerance.unchanged(m.as_ref(), prev.as_ref(), cur.as_ref())),
        };

        if changed {
            last_kept.insert(key, metrics);
            kept.push(record);
        }
    }

    kept
}

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::outcome::GenerationOutcome;

/// Reduction of a batch: one outcome per submitted item, in completion order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub outcomes: Vec<GenerationOutcome>,
    pub successful: usize,
    pub failed: usize,
    /// Sum of `cost_estimate` over successful outcomes only.
    pub total_cost_usd: f64,
    pub elapsed_seconds: f64,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: Vec<GenerationOutcome>, elapsed_seconds: f64) -> Self {
        let successful = outcomes.iter().filter(|outcome| outcome.success).count();
        let total_cost_usd = outcomes
            .iter()
            .filter(|outcome| outcome.success)
            .map(|outcome| outcome.cost_estimate)
            .sum();
        Self {
            failed: outcomes.len() - successful,
            successful,
            total_cost_usd,
            elapsed_seconds,
            outcomes,
        }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn average_seconds_per_item(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.elapsed_seconds / self.outcomes.len() as f64
    }
}

pub fn write_summary(
    path: &Path,
    summary: &BatchSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("total".to_string(), Value::from(summary.total()));
    payload.insert(
        "avg_seconds_per_item".to_string(),
        Value::from(summary.average_seconds_per_item()),
    );
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

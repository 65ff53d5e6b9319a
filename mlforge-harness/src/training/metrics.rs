//! Per-epoch metric aggregation and run-level history.

use mlforge_core::ScoreMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Collects per-batch scalar mappings over one validation epoch and
/// reduces each key to its arithmetic mean, prefixed `avg_`.
#[derive(Debug, Default)]
pub struct EpochAccumulator {
    series: BTreeMap<String, Vec<f64>>,
}

impl EpochAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, scalars: &BTreeMap<String, f64>) {
        for (key, value) in scalars {
            self.series.entry(key.clone()).or_default().push(*value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn averages(&self) -> BTreeMap<String, f64> {
        self.series
            .iter()
            .map(|(key, values)| {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                (format!("avg_{key}"), mean)
            })
            .collect()
    }
}

/// Score trajectory of one training run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunHistory {
    pub epochs_completed: usize,
    pub score_history: Vec<f64>,
    pub best_epoch: Option<usize>,
    pub best_score: Option<f64>,
    pub stopped_early: bool,
    pub total_training_time_secs: f64,
}

impl RunHistory {
    pub fn record_epoch(&mut self, epoch: usize, score: f64, mode: ScoreMode) {
        self.score_history.push(score);
        self.epochs_completed += 1;

        let improved = match self.best_score {
            None => true,
            Some(best) => match mode {
                ScoreMode::Max => score > best,
                ScoreMode::Min => score < best,
            },
        };
        if improved {
            self.best_score = Some(score);
            self.best_epoch = Some(epoch);
        }
    }
}

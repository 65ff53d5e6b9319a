//! Hook seams — pluggable stages of the per-batch pipeline.
//!
//! Fixed order per batch: forward hook → post-forward hook → loss →
//! metric hook → logger hook. Each category is an explicit trait with a
//! documented return contract, checked by the trainer at the boundary.

use crate::data::Batch;
use crate::error::HarnessError;
use crate::model::{Model, ModelOutput};
use crate::writers::WriterSet;
use mlforge_core::registry::typed_params;
use mlforge_core::{CoreError, Params};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Runs the model on a batch and returns its raw outputs.
pub trait ForwardHook: Send {
    fn run(
        &self,
        model: &dyn Model,
        batch: &Batch,
        is_train: bool,
    ) -> Result<ModelOutput, HarnessError>;
}

/// Plain forward pass.
pub struct DefaultForward;

impl ForwardHook for DefaultForward {
    fn run(
        &self,
        model: &dyn Model,
        batch: &Batch,
        _is_train: bool,
    ) -> Result<ModelOutput, HarnessError> {
        model.forward(batch)
    }
}

/// Reshapes or augments raw outputs before loss and metrics.
pub trait PostForwardHook: Send {
    fn run(
        &self,
        output: ModelOutput,
        batch: &Batch,
        is_train: bool,
    ) -> Result<ModelOutput, HarnessError>;
}

/// Passes outputs through untouched.
pub struct IdentityPostForward;

impl PostForwardHook for IdentityPostForward {
    fn run(
        &self,
        output: ModelOutput,
        _batch: &Batch,
        _is_train: bool,
    ) -> Result<ModelOutput, HarnessError> {
        Ok(output)
    }
}

/// Computes named scalar metrics for a batch.
///
/// Contract: the returned mapping must contain the key `score` — the
/// quantity early stopping monitors. The trainer rejects violations with
/// `HookContract`.
pub trait MetricHook: Send {
    fn compute(
        &self,
        output: &ModelOutput,
        batch: &Batch,
        is_train: bool,
    ) -> Result<BTreeMap<String, f64>, HarnessError>;
}

/// Row-argmax accuracy in percent, reported as both `score` and `accuracy`.
pub struct ArgmaxAccuracy;

impl MetricHook for ArgmaxAccuracy {
    fn compute(
        &self,
        output: &ModelOutput,
        batch: &Batch,
        _is_train: bool,
    ) -> Result<BTreeMap<String, f64>, HarnessError> {
        debug!("Computing argmax accuracy");
        if output.logits.len() != batch.len() {
            return Err(HarnessError::hook_contract(format!(
                "{} logit rows for {} targets",
                output.logits.len(),
                batch.len()
            )));
        }
        let mut correct = 0usize;
        for (row, &target) in output.logits.iter().zip(&batch.targets) {
            let predicted = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i as i64)
                .ok_or_else(|| HarnessError::hook_contract("empty logit row"))?;
            if predicted == target {
                correct += 1;
            }
        }
        let total = batch.len().max(1);
        let accuracy = 100.0 * correct as f64 / total as f64;
        Ok(BTreeMap::from([
            ("score".to_string(), accuracy),
            ("accuracy".to_string(), accuracy),
        ]))
    }
}

/// One log entry handed to the logger hook.
///
/// `step` is the batch index within the epoch when logging per batch, and
/// absent for epoch-level aggregates.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub split: String,
    pub epoch: usize,
    pub step: Option<usize>,
    pub num_steps_in_epoch: Option<usize>,
    pub scalars: BTreeMap<String, f64>,
}

impl LogRecord {
    /// Monotone global log step: epoch-level records land on the epoch
    /// boundary, per-batch records interpolate fractionally within it.
    pub fn log_step(&self) -> i64 {
        match (self.step, self.num_steps_in_epoch) {
            (Some(step), Some(total)) if total > 0 => {
                (self.epoch as f64 * 10_000.0 + (step as f64 / total as f64) * 10_000.0) as i64
            }
            _ => self.epoch as i64,
        }
    }
}

/// Side-effecting sink stage: writes a record to the enabled writers.
pub trait LoggerHook: Send {
    fn log(&self, writers: &mut WriterSet, record: &LogRecord) -> Result<(), HarnessError>;
}

/// Fans every scalar out to each writer as `{split}/{key}`.
pub struct ScalarLogger;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScalarLoggerParams {
    // Sink toggles are consumed by the writer setup; accepted here so the
    // same params node configures both sides.
    #[serde(default)]
    #[allow(dead_code)]
    use_events_file: bool,
    #[serde(default)]
    #[allow(dead_code)]
    use_console: bool,
}

impl ScalarLogger {
    pub fn from_params(params: Params) -> Result<Self, CoreError> {
        let _: ScalarLoggerParams = typed_params("scalar", params)?;
        Ok(Self)
    }
}

impl LoggerHook for ScalarLogger {
    fn log(&self, writers: &mut WriterSet, record: &LogRecord) -> Result<(), HarnessError> {
        let log_step = record.log_step();
        for (key, value) in &record.scalars {
            writers.add_scalar(&format!("{}/{}", record.split, key), *value, log_step)?;
        }
        Ok(())
    }
}

/// Which sinks a run enables; parsed from `logger_hook.params`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkFlags {
    #[serde(default)]
    pub use_events_file: bool,
    #[serde(default)]
    pub use_console: bool,
}

impl SinkFlags {
    pub fn from_params(params: &Params) -> Result<Self, CoreError> {
        serde_json::from_value(serde_json::Value::Object(params.clone()))
            .map_err(|e| CoreError::config(format!("invalid logger_hook params: {e}")))
    }
}

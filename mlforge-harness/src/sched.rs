//! Learning-rate schedulers, stepped once per epoch.

use crate::optim::Optimizer;
use mlforge_core::registry::typed_params;
use mlforge_core::{CoreError, Params};
use serde::Deserialize;
use tracing::debug;

pub trait Scheduler: Send {
    /// Advance one epoch and adjust the optimizer's learning rate.
    fn step(&mut self, optimizer: &mut dyn Optimizer);
}

/// Multiplies the learning rate by `gamma` every `step_size` epochs.
///
/// Constructed with `last_epoch` on resume; the restored optimizer already
/// carries its decayed rate, so the scheduler only needs to know where the
/// next decay boundary falls.
pub struct StepLr {
    step_size: usize,
    gamma: f64,
    epoch: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepLrParams {
    #[serde(default = "default_step_size")]
    step_size: usize,
    #[serde(default = "default_gamma")]
    gamma: f64,
    /// Injected by the builder on resume.
    #[serde(default = "default_last_epoch")]
    last_epoch: i64,
}

fn default_step_size() -> usize {
    10
}

fn default_gamma() -> f64 {
    0.5
}

fn default_last_epoch() -> i64 {
    -1
}

impl StepLr {
    pub fn from_params(params: Params) -> Result<Self, CoreError> {
        let p: StepLrParams = typed_params("step_lr", params)?;
        if p.step_size == 0 {
            return Err(CoreError::config("step_lr: step_size must be positive"));
        }
        Ok(Self {
            step_size: p.step_size,
            gamma: p.gamma,
            epoch: p.last_epoch,
        })
    }
}

impl Scheduler for StepLr {
    fn step(&mut self, optimizer: &mut dyn Optimizer) {
        self.epoch += 1;
        if self.epoch > 0 && self.epoch % self.step_size as i64 == 0 {
            let lr = optimizer.learning_rate() * self.gamma;
            debug!(epoch = self.epoch, lr, "StepLr decay");
            optimizer.set_learning_rate(lr);
        }
    }
}

/// Keeps the learning rate fixed.
pub struct ConstantLr;

impl Scheduler for ConstantLr {
    fn step(&mut self, _optimizer: &mut dyn Optimizer) {}
}

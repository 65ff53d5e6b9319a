//! Optimizer seam and the built-in SGD implementation.

use crate::error::HarnessError;
use crate::model::Model;
use mlforge_core::registry::typed_params;
use mlforge_core::{CoreError, Params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Serializable optimizer state, persisted inside checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub learning_rate: f64,
    /// Per-parameter auxiliary buffers (momentum velocity and the like).
    pub slots: BTreeMap<String, Vec<f64>>,
}

pub trait Optimizer: Send {
    /// Apply one parameter update from the accumulated gradients.
    fn step(&mut self, model: &mut dyn Model) -> Result<(), HarnessError>;

    /// Clear every parameter's gradient accumulator.
    fn zero_grad(&mut self, model: &mut dyn Model);

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);

    fn state_dict(&self) -> OptimizerState;

    fn load_state_dict(&mut self, state: &OptimizerState) -> Result<(), HarnessError>;
}

/// SGD with momentum and (optionally grouped) weight decay.
///
/// Parameters in the `no_decay` set skip the weight-decay term; the builder
/// fills that set from `group_by_decay` when `train.no_bias_decay` is on.
pub struct Sgd {
    lr: f64,
    momentum: f64,
    weight_decay: f64,
    no_decay: HashSet<String>,
    velocity: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SgdParams {
    lr: f64,
    #[serde(default)]
    momentum: f64,
    #[serde(default)]
    weight_decay: f64,
    /// Injected by the builder when `train.no_bias_decay` is set.
    #[serde(default)]
    no_decay: Vec<String>,
}

impl Sgd {
    pub fn from_params(params: Params) -> Result<Self, CoreError> {
        let p: SgdParams = typed_params("sgd", params)?;
        if p.lr <= 0.0 {
            return Err(CoreError::config("sgd: lr must be positive"));
        }
        Ok(Self {
            lr: p.lr,
            momentum: p.momentum,
            weight_decay: p.weight_decay,
            no_decay: p.no_decay.into_iter().collect(),
            velocity: BTreeMap::new(),
        })
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, model: &mut dyn Model) -> Result<(), HarnessError> {
        for param in model.parameters_mut() {
            let decay = if self.no_decay.contains(&param.name) {
                0.0
            } else {
                self.weight_decay
            };
            let velocity = self
                .velocity
                .entry(param.name.clone())
                .or_insert_with(|| vec![0.0; param.values.len()]);
            if velocity.len() != param.values.len() {
                return Err(HarnessError::training(format!(
                    "velocity shape mismatch for parameter '{}'",
                    param.name
                )));
            }
            for ((value, grad), v) in param
                .values
                .iter_mut()
                .zip(&param.grad)
                .zip(velocity.iter_mut())
            {
                let g = grad + decay * *value;
                *v = self.momentum * *v + g;
                *value -= self.lr * *v;
            }
        }
        Ok(())
    }

    fn zero_grad(&mut self, model: &mut dyn Model) {
        for param in model.parameters_mut() {
            param.zero_grad();
        }
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn state_dict(&self) -> OptimizerState {
        OptimizerState {
            learning_rate: self.lr,
            slots: self.velocity.clone(),
        }
    }

    fn load_state_dict(&mut self, state: &OptimizerState) -> Result<(), HarnessError> {
        self.lr = state.learning_rate;
        self.velocity = state.slots.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Batch;
    use crate::model::LinearClassifier;
    use serde_json::json;

    fn model() -> LinearClassifier {
        let mut params = Params::new();
        params.insert("in_features".into(), json!(1));
        params.insert("out_features".into(), json!(1));
        LinearClassifier::from_params(params).unwrap()
    }

    fn sgd(lr: f64) -> Sgd {
        let mut params = Params::new();
        params.insert("lr".into(), json!(lr));
        Sgd::from_params(params).unwrap()
    }

    #[test]
    fn test_step_moves_against_gradient() {
        let mut m = model();
        let batch = Batch {
            features: vec![vec![1.0]],
            targets: vec![0],
        };
        let before = m.state_dict();
        m.backward(&batch, &[vec![1.0]]).unwrap();

        let mut opt = sgd(0.5);
        opt.step(&mut m).unwrap();
        let after = m.state_dict();
        assert!((after["weight"][0] - (before["weight"][0] - 0.5)).abs() < 1e-12);
        assert!((after["bias"][0] - (before["bias"][0] - 0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_zero_grad_clears_accumulators() {
        let mut m = model();
        let batch = Batch {
            features: vec![vec![1.0]],
            targets: vec![0],
        };
        m.backward(&batch, &[vec![1.0]]).unwrap();
        let mut opt = sgd(0.1);
        opt.zero_grad(&mut m);
        assert!(m.parameters().iter().all(|p| p.grad.iter().all(|&g| g == 0.0)));
    }

    #[test]
    fn test_no_decay_set_skips_weight_decay() {
        let mut m = model();
        // zero gradients; only decay moves values
        let mut params = Params::new();
        params.insert("lr".into(), json!(1.0));
        params.insert("weight_decay".into(), json!(0.5));
        params.insert("no_decay".into(), json!(["bias"]));
        let mut opt = Sgd::from_params(params).unwrap();

        for p in m.parameters_mut() {
            p.values.fill(2.0);
        }
        opt.step(&mut m).unwrap();
        let state = m.state_dict();
        assert!((state["weight"][0] - 1.0).abs() < 1e-12); // decayed
        assert!((state["bias"][0] - 2.0).abs() < 1e-12); // untouched
    }

    #[test]
    fn test_state_dict_roundtrip() {
        let mut m = model();
        let batch = Batch {
            features: vec![vec![1.0]],
            targets: vec![0],
        };
        m.backward(&batch, &[vec![1.0]]).unwrap();

        let mut params = Params::new();
        params.insert("lr".into(), json!(0.1));
        params.insert("momentum".into(), json!(0.9));
        let mut opt = Sgd::from_params(params).unwrap();
        opt.step(&mut m).unwrap();

        let state = opt.state_dict();
        let mut restored = sgd(0.7);
        restored.load_state_dict(&state).unwrap();
        assert_eq!(restored.state_dict(), state);
        assert!((restored.learning_rate() - 0.1).abs() < 1e-12);
    }
}

//! Model seam — the trait the trainer drives, plus a small built-in.
//!
//! Real model architectures are external collaborators; the built-in
//! `LinearClassifier` exists so the harness seams (forward, gradient
//! accumulation, state save/restore) are real and testable.

use crate::data::Batch;
use crate::error::HarnessError;
use mlforge_core::registry::typed_params;
use mlforge_core::{CoreError, Params};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::collections::BTreeMap;

/// A named tensor of weights with its gradient accumulator.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub values: Vec<f64>,
    pub grad: Vec<f64>,
}

impl Parameter {
    pub fn new(name: &str, values: Vec<f64>) -> Self {
        let grad = vec![0.0; values.len()];
        Self {
            name: name.to_string(),
            values,
            grad,
        }
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }
}

/// Flat serializable snapshot of all parameters, keyed by name.
pub type ModelState = BTreeMap<String, Vec<f64>>;

/// Raw output of a forward pass: one logit row per example.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutput {
    pub logits: Vec<Vec<f64>>,
}

/// The model contract the trainer drives.
///
/// Gradients accumulate into each parameter's `grad` buffer across
/// `backward` calls until the optimizer zeroes them; this is what makes
/// gradient accumulation a loop-level concern rather than a model one.
pub trait Model: Send {
    fn forward(&self, batch: &Batch) -> Result<ModelOutput, HarnessError>;

    /// Accumulate parameter gradients from the loss gradient w.r.t. logits.
    fn backward(&mut self, batch: &Batch, logit_grads: &[Vec<f64>]) -> Result<(), HarnessError>;

    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    /// Train vs eval mode. Evaluation must not mutate model state.
    fn set_train_mode(&mut self, train: bool);

    fn state_dict(&self) -> ModelState {
        self.parameters()
            .into_iter()
            .map(|p| (p.name.clone(), p.values.clone()))
            .collect()
    }

    fn load_state_dict(&mut self, state: &ModelState) -> Result<(), HarnessError> {
        for param in self.parameters_mut() {
            let values = state.get(&param.name).ok_or_else(|| {
                HarnessError::checkpoint_load(format!("state missing parameter '{}'", param.name))
            })?;
            if values.len() != param.values.len() {
                return Err(HarnessError::checkpoint_load(format!(
                    "parameter '{}' has {} values, expected {}",
                    param.name,
                    values.len(),
                    param.values.len()
                )));
            }
            param.values.clone_from(values);
        }
        Ok(())
    }
}

/// Partition parameter names into (decay, no-decay) groups.
///
/// Bias and normalization parameters are conventionally excluded from
/// weight decay; the split is by name, matching how models label them.
pub fn group_by_decay(model: &dyn Model) -> (Vec<String>, Vec<String>) {
    let mut decay = Vec::new();
    let mut no_decay = Vec::new();
    for param in model.parameters() {
        if param.name.ends_with("bias") || param.name.contains("norm") {
            no_decay.push(param.name.clone());
        } else {
            decay.push(param.name.clone());
        }
    }
    (decay, no_decay)
}

/// Single linear layer: `logits = W x + b`.
pub struct LinearClassifier {
    in_features: usize,
    out_features: usize,
    weight: Parameter,
    bias: Parameter,
    train_mode: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinearClassifierParams {
    in_features: usize,
    out_features: usize,
    #[serde(default = "default_init_seed")]
    seed: u64,
    #[serde(default = "default_init_scale")]
    init_scale: f64,
}

fn default_init_seed() -> u64 {
    42
}

fn default_init_scale() -> f64 {
    0.1
}

impl LinearClassifier {
    pub fn from_params(params: Params) -> Result<Self, CoreError> {
        let p: LinearClassifierParams = typed_params("linear_classifier", params)?;
        if p.in_features == 0 || p.out_features == 0 {
            return Err(CoreError::config(
                "linear_classifier: in_features and out_features must be positive",
            ));
        }
        if !(p.init_scale > 0.0) {
            return Err(CoreError::config(
                "linear_classifier: init_scale must be positive",
            ));
        }
        let mut rng = StdRng::seed_from_u64(p.seed);
        let weight: Vec<f64> = (0..p.in_features * p.out_features)
            .map(|_| rng.gen_range(-p.init_scale..p.init_scale))
            .collect();
        let bias = vec![0.0; p.out_features];
        Ok(Self {
            in_features: p.in_features,
            out_features: p.out_features,
            weight: Parameter::new("weight", weight),
            bias: Parameter::new("bias", bias),
            train_mode: true,
        })
    }
}

impl Model for LinearClassifier {
    fn forward(&self, batch: &Batch) -> Result<ModelOutput, HarnessError> {
        let mut logits = Vec::with_capacity(batch.len());
        for features in &batch.features {
            if features.len() != self.in_features {
                return Err(HarnessError::training(format!(
                    "expected {} features, got {}",
                    self.in_features,
                    features.len()
                )));
            }
            let mut row = Vec::with_capacity(self.out_features);
            for o in 0..self.out_features {
                let offset = o * self.in_features;
                let mut acc = self.bias.values[o];
                for (i, x) in features.iter().enumerate() {
                    acc += self.weight.values[offset + i] * x;
                }
                row.push(acc);
            }
            logits.push(row);
        }
        Ok(ModelOutput { logits })
    }

    fn backward(&mut self, batch: &Batch, logit_grads: &[Vec<f64>]) -> Result<(), HarnessError> {
        if logit_grads.len() != batch.len() {
            return Err(HarnessError::training(format!(
                "{} gradient rows for {} examples",
                logit_grads.len(),
                batch.len()
            )));
        }
        for (features, grads) in batch.features.iter().zip(logit_grads) {
            for (o, g) in grads.iter().enumerate() {
                let offset = o * self.in_features;
                for (i, x) in features.iter().enumerate() {
                    self.weight.grad[offset + i] += g * x;
                }
                self.bias.grad[o] += g;
            }
        }
        Ok(())
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.weight, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weight, &mut self.bias]
    }

    fn set_train_mode(&mut self, train: bool) {
        self.train_mode = train;
    }
}

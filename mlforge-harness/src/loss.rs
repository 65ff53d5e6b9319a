//! Loss seam and the built-in cross-entropy loss.

use crate::data::Batch;
use crate::error::HarnessError;
use crate::model::ModelOutput;
use mlforge_core::registry::typed_params;
use mlforge_core::{CoreError, Params};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Result of a loss computation.
///
/// `loss` is the scalar the loop logs and gates on; `extras` carries any
/// auxiliary terms under their own names; `logit_grads` is the gradient of
/// the loss w.r.t. the model's logits, fed back through `Model::backward`
/// during training (absent for losses that are observe-only).
#[derive(Debug, Clone, Default)]
pub struct LossOutput {
    pub loss: f64,
    pub extras: BTreeMap<String, f64>,
    pub logit_grads: Option<Vec<Vec<f64>>>,
}

impl LossOutput {
    /// The scalars this loss contributes to a batch's log record.
    pub fn scalars(&self) -> BTreeMap<String, f64> {
        let mut scalars = self.extras.clone();
        scalars.insert("loss".to_string(), self.loss);
        scalars
    }
}

pub trait LossFn: Send {
    fn compute(&self, output: &ModelOutput, batch: &Batch) -> Result<LossOutput, HarnessError>;
}

/// Softmax cross-entropy, mean-reduced over the batch.
pub struct CrossEntropyLoss;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CrossEntropyParams {}

impl CrossEntropyLoss {
    pub fn from_params(params: Params) -> Result<Self, CoreError> {
        let _: CrossEntropyParams = typed_params("cross_entropy", params)?;
        Ok(Self)
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

impl LossFn for CrossEntropyLoss {
    fn compute(&self, output: &ModelOutput, batch: &Batch) -> Result<LossOutput, HarnessError> {
        if output.logits.len() != batch.len() {
            return Err(HarnessError::training(format!(
                "{} logit rows for {} targets",
                output.logits.len(),
                batch.len()
            )));
        }
        let n = batch.len().max(1) as f64;
        let mut total = 0.0;
        let mut grads = Vec::with_capacity(output.logits.len());
        for (row, &target) in output.logits.iter().zip(&batch.targets) {
            let target = usize::try_from(target).map_err(|_| {
                HarnessError::training(format!("negative class target {target}"))
            })?;
            if target >= row.len() {
                return Err(HarnessError::training(format!(
                    "class target {target} out of range for {} logits",
                    row.len()
                )));
            }
            let probs = softmax(row);
            total -= probs[target].max(f64::MIN_POSITIVE).ln();

            let mut grad_row: Vec<f64> = probs.iter().map(|p| p / n).collect();
            grad_row[target] -= 1.0 / n;
            grads.push(grad_row);
        }
        Ok(LossOutput {
            loss: total / n,
            extras: BTreeMap::new(),
            logit_grads: Some(grads),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Batch {
        Batch {
            features: vec![vec![0.0], vec![0.0]],
            targets: vec![0, 1],
        }
    }

    #[test]
    fn test_uniform_logits_give_ln_k() {
        let output = ModelOutput {
            logits: vec![vec![0.0, 0.0], vec![0.0, 0.0]],
        };
        let out = CrossEntropyLoss.compute(&output, &batch()).unwrap();
        assert!((out.loss - (2.0f64).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_grads_sum_to_zero_per_row() {
        let output = ModelOutput {
            logits: vec![vec![2.0, -1.0], vec![0.5, 0.5]],
        };
        let out = CrossEntropyLoss.compute(&output, &batch()).unwrap();
        for row in out.logit_grads.unwrap() {
            let sum: f64 = row.iter().sum();
            assert!(sum.abs() < 1e-12);
        }
    }

    #[test]
    fn test_confident_correct_prediction_has_low_loss() {
        let output = ModelOutput {
            logits: vec![vec![10.0, -10.0], vec![-10.0, 10.0]],
        };
        let out = CrossEntropyLoss.compute(&output, &batch()).unwrap();
        assert!(out.loss < 1e-6);
    }

    #[test]
    fn test_target_out_of_range_fails() {
        let output = ModelOutput {
            logits: vec![vec![0.0, 0.0]],
        };
        let bad = Batch {
            features: vec![vec![0.0]],
            targets: vec![5],
        };
        assert!(CrossEntropyLoss.compute(&output, &bad).is_err());
    }

    #[test]
    fn test_scalars_include_loss_key() {
        let mut out = LossOutput {
            loss: 0.5,
            ..Default::default()
        };
        out.extras.insert("aux".into(), 0.1);
        let scalars = out.scalars();
        assert_eq!(scalars.get("loss"), Some(&0.5));
        assert_eq!(scalars.get("aux"), Some(&0.1));
    }
}

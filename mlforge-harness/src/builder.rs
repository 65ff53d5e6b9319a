//! Builder — turns the configuration tree into instantiated components.
//!
//! Owns one registry per component category and exposes one build method
//! per category. `with_defaults` registers every built-in; callers extend
//! the registries before handing the builder to the trainer.

use crate::data::dataset::{InMemoryDataset, JsonlDataset};
use crate::data::transform::{Compose, Identity, Normalize, Scale};
use crate::data::{DataLoader, Dataset, LoaderBinding, Transform};
use crate::hooks::{
    ArgmaxAccuracy, DefaultForward, ForwardHook, IdentityPostForward, LoggerHook, MetricHook,
    PostForwardHook, ScalarLogger,
};
use crate::loss::{CrossEntropyLoss, LossFn};
use crate::model::{LinearClassifier, Model};
use crate::optim::{Optimizer, Sgd};
use crate::sched::{ConstantLr, Scheduler, StepLr};
use mlforge_core::registry::merge_params;
use mlforge_core::{ComponentSpec, CoreError, ExperimentConfig, Params, Registry};
use serde_json::json;
use tracing::debug;

/// The designated transform name that chains listed sub-transforms.
const COMPOSE_MARKER: &str = "compose";

pub struct Builder {
    pub models: Registry<dyn Model>,
    pub losses: Registry<dyn LossFn>,
    pub optimizers: Registry<dyn Optimizer>,
    pub schedulers: Registry<dyn Scheduler>,
    pub datasets: Registry<dyn Dataset>,
    pub transforms: Registry<dyn Transform>,
    pub forward_hooks: Registry<dyn ForwardHook>,
    pub post_forward_hooks: Registry<dyn PostForwardHook>,
    pub metric_hooks: Registry<dyn MetricHook>,
    pub logger_hooks: Registry<dyn LoggerHook>,
}

impl Builder {
    /// Empty registries; nothing registered.
    pub fn empty() -> Self {
        Self {
            models: Registry::new("model"),
            losses: Registry::new("loss"),
            optimizers: Registry::new("optimizer"),
            schedulers: Registry::new("scheduler"),
            datasets: Registry::new("dataset"),
            transforms: Registry::new("transform"),
            forward_hooks: Registry::new("forward_hook"),
            post_forward_hooks: Registry::new("post_forward_hook"),
            metric_hooks: Registry::new("metric_hook"),
            logger_hooks: Registry::new("logger_hook"),
        }
    }

    /// Registries pre-populated with every built-in component.
    pub fn with_defaults() -> Result<Self, CoreError> {
        let mut b = Self::empty();

        b.models.add("linear_classifier", |params| {
            Ok(Box::new(LinearClassifier::from_params(params)?))
        })?;

        b.losses
            .add("cross_entropy", |params| Ok(Box::new(CrossEntropyLoss::from_params(params)?)))?;

        b.optimizers
            .add("sgd", |params| Ok(Box::new(Sgd::from_params(params)?)))?;

        b.schedulers
            .add("step_lr", |params| Ok(Box::new(StepLr::from_params(params)?)))?;
        b.schedulers.add("constant", |_| Ok(Box::new(ConstantLr)))?;

        b.datasets.add("in_memory", |params| {
            Ok(Box::new(InMemoryDataset::from_params(params)?))
        })?;
        b.datasets
            .add("jsonl", |params| Ok(Box::new(JsonlDataset::from_params(params)?)))?;

        b.transforms.add("identity", |_| Ok(Box::new(Identity)))?;
        b.transforms
            .add("normalize", |params| Ok(Box::new(Normalize::from_params(params)?)))?;
        b.transforms
            .add("scale", |params| Ok(Box::new(Scale::from_params(params)?)))?;

        b.forward_hooks.add("default", |_| Ok(Box::new(DefaultForward)))?;
        b.post_forward_hooks
            .add("identity", |_| Ok(Box::new(IdentityPostForward)))?;
        b.metric_hooks
            .add("argmax_accuracy", |_| Ok(Box::new(ArgmaxAccuracy)))?;
        b.logger_hooks
            .add("scalar", |params| Ok(Box::new(ScalarLogger::from_params(params)?)))?;

        Ok(b)
    }

    pub fn build_model(&self, config: &ExperimentConfig) -> Result<Box<dyn Model>, CoreError> {
        self.models.build(&config.model, Params::new())
    }

    pub fn build_loss_fn(&self, config: &ExperimentConfig) -> Result<Box<dyn LossFn>, CoreError> {
        self.losses.build(&config.loss, Params::new())
    }

    /// `no_decay` is the set of parameter names excluded from weight decay;
    /// empty unless `train.no_bias_decay` is on.
    pub fn build_optimizer(
        &self,
        config: &ExperimentConfig,
        no_decay: &[String],
    ) -> Result<Box<dyn Optimizer>, CoreError> {
        let mut overrides = Params::new();
        if !no_decay.is_empty() {
            overrides.insert("no_decay".into(), json!(no_decay));
        }
        self.optimizers.build(&config.optimizer, overrides)
    }

    /// `last_epoch` is -1 on a fresh run and the restored epoch on resume.
    pub fn build_scheduler(
        &self,
        config: &ExperimentConfig,
        last_epoch: i64,
    ) -> Result<Box<dyn Scheduler>, CoreError> {
        let mut overrides = Params::new();
        overrides.insert("last_epoch".into(), json!(last_epoch));
        self.schedulers.build(&config.scheduler, overrides)
    }

    pub fn build_forward_hook(
        &self,
        config: &ExperimentConfig,
    ) -> Result<Box<dyn ForwardHook>, CoreError> {
        self.forward_hooks.build(&config.forward_hook, Params::new())
    }

    pub fn build_post_forward_hook(
        &self,
        config: &ExperimentConfig,
    ) -> Result<Box<dyn PostForwardHook>, CoreError> {
        self.post_forward_hooks
            .build(&config.post_forward_hook, Params::new())
    }

    pub fn build_metric_fn(
        &self,
        config: &ExperimentConfig,
    ) -> Result<Box<dyn MetricHook>, CoreError> {
        self.metric_hooks.build(&config.metric_hook, Params::new())
    }

    pub fn build_logger_fn(
        &self,
        config: &ExperimentConfig,
    ) -> Result<Box<dyn LoggerHook>, CoreError> {
        self.logger_hooks.build(&config.logger_hook, Params::new())
    }

    /// Build the configured transform chain.
    ///
    /// The `compose` marker is not a registered transform: its
    /// `params.transforms` list names the sub-transforms to chain in order.
    pub fn build_transforms(
        &self,
        config: &ExperimentConfig,
    ) -> Result<Box<dyn Transform>, CoreError> {
        let spec = &config.transforms;
        if spec.name == COMPOSE_MARKER {
            let listed = spec
                .params
                .get("transforms")
                .ok_or_else(|| CoreError::missing_key("transforms.params.transforms"))?;
            let specs: Vec<ComponentSpec> = serde_json::from_value(listed.clone())
                .map_err(|e| CoreError::config(format!("invalid compose list: {e}")))?;
            let mut chain: Vec<Box<dyn Transform>> = Vec::with_capacity(specs.len());
            for sub in &specs {
                chain.push(self.transforms.build(sub, Params::new())?);
            }
            Ok(Box::new(Compose::new(chain)))
        } else {
            let spec = ComponentSpec {
                name: spec.name.clone(),
                params: spec.params.clone(),
            };
            self.transforms.build(&spec, Params::new())
        }
    }

    /// Build one dataloader per declared dataset split.
    ///
    /// Split params are overlaid on the base dataset params; the merged
    /// `train` flag decides batch size, shuffling, and drop-last.
    pub fn build_dataloaders(
        &self,
        config: &ExperimentConfig,
    ) -> Result<Vec<LoaderBinding>, CoreError> {
        let mut bindings = Vec::with_capacity(config.dataset.splits.len());
        for (index, split) in config.dataset.splits.iter().enumerate() {
            let merged = merge_params(&config.dataset.params, split.clone());
            let is_train = merged
                .get("train")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);

            let transform = self.build_transforms(config)?;
            let spec = ComponentSpec {
                name: config.dataset.name.clone(),
                params: merged,
            };
            let dataset = self.datasets.build(&spec, Params::new())?;

            let batch_size = if is_train {
                config.train.batch_size
            } else {
                config.evaluation.batch_size
            };
            debug!(
                split = index,
                is_train,
                batch_size,
                rows = dataset.len(),
                "Built dataloader"
            );
            let loader = DataLoader::new(
                dataset,
                Some(transform),
                batch_size,
                is_train,
                is_train,
                config.train.seed.wrapping_add(index as u64),
            );
            bindings.push(LoaderBinding { is_train, loader });
        }
        Ok(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config_yaml(extra_transforms: &str) -> String {
        format!(
            r#"
train:
  dir: /tmp/runs
  name: builder-test
  batch_size: 2
  num_epochs: 1
evaluation:
  batch_size: 3
model:
  name: linear_classifier
  params:
    in_features: 1
    out_features: 2
loss:
  name: cross_entropy
optimizer:
  name: sgd
  params:
    lr: 0.1
scheduler:
  name: step_lr
{extra_transforms}
dataset:
  name: in_memory
  params:
    examples:
      - {{features: [0.0], target: 0}}
      - {{features: [1.0], target: 1}}
      - {{features: [2.0], target: 0}}
      - {{features: [3.0], target: 1}}
      - {{features: [4.0], target: 0}}
  splits:
    - train: true
    - train: false
"#
        )
    }

    fn config() -> ExperimentConfig {
        ExperimentConfig::from_yaml_str(&config_yaml("")).unwrap()
    }

    #[test]
    fn test_builds_every_category() {
        let b = Builder::with_defaults().unwrap();
        let config = config();
        b.build_model(&config).unwrap();
        b.build_loss_fn(&config).unwrap();
        b.build_optimizer(&config, &[]).unwrap();
        b.build_scheduler(&config, -1).unwrap();
        b.build_forward_hook(&config).unwrap();
        b.build_post_forward_hook(&config).unwrap();
        b.build_metric_fn(&config).unwrap();
        b.build_logger_fn(&config).unwrap();
        b.build_transforms(&config).unwrap();
    }

    #[test]
    fn test_unknown_model_name_fails() {
        let b = Builder::with_defaults().unwrap();
        let mut config = config();
        config.model.name = "transformer_xxl".into();
        let err = b.build_model(&config).map(|_| ()).unwrap_err();
        assert!(matches!(err, CoreError::UnknownName { .. }));
    }

    #[test]
    fn test_dataloaders_split_batching() {
        let b = Builder::with_defaults().unwrap();
        let bindings = b.build_dataloaders(&config()).unwrap();
        assert_eq!(bindings.len(), 2);

        // 5 examples: train split bs=2 drop-last -> 2 batches,
        // eval split bs=3 keep-last -> 2 batches
        assert!(bindings[0].is_train);
        assert_eq!(bindings[0].loader.num_batches(), 2);
        assert!(!bindings[1].is_train);
        assert_eq!(bindings[1].loader.num_batches(), 2);
    }

    #[test]
    fn test_compose_transforms() {
        let yaml = config_yaml(
            r#"transforms:
  name: compose
  params:
    transforms:
      - name: scale
        params: {factor: 2.0}
      - name: normalize
        params: {mean: 1.0, std: 1.0}
"#,
        );
        let config = ExperimentConfig::from_yaml_str(&yaml).unwrap();
        let b = Builder::with_defaults().unwrap();
        let mut bindings = b.build_dataloaders(&config).unwrap();

        // eval split keeps dataset order: features 0..4 scaled then shifted
        let batches = bindings[1].loader.batches().unwrap();
        assert_eq!(batches[0].features[0], vec![-1.0]); // 0*2 - 1
        assert_eq!(batches[0].features[1], vec![1.0]); // 1*2 - 1
    }

    #[test]
    fn test_compose_without_list_fails() {
        let yaml = config_yaml("transforms:\n  name: compose\n");
        let config = ExperimentConfig::from_yaml_str(&yaml).unwrap();
        let b = Builder::with_defaults().unwrap();
        let err = b.build_dataloaders(&config).map(|_| ()).unwrap_err();
        assert!(matches!(err, CoreError::MissingKey(_)));
    }

    #[test]
    fn test_no_decay_overrides_reach_optimizer() {
        let b = Builder::with_defaults().unwrap();
        let config = config();
        // Just verifies the override path constructs; behavior is covered
        // in the optimizer tests.
        b.build_optimizer(&config, &["bias".to_string()]).unwrap();
    }
}

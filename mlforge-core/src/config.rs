//! Configuration tree for a training run.
//!
//! A run is described declaratively: every buildable component (model, loss,
//! optimizer, scheduler, dataset, transforms, hooks) is a `{name, params}`
//! node whose `name` resolves against the component registry. Configs are
//! written in YAML; `params` stay as JSON values until a factory
//! deserializes them into its own typed parameter struct.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Keyword parameters for a component factory.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// A buildable component reference: registry name plus keyword parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    #[serde(default)]
    pub params: Params,
}

impl ComponentSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Params::new(),
        }
    }
}

/// Direction of the monitored score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMode {
    Max,
    Min,
}

/// What to do when a batch produces a NaN or infinite loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonFinitePolicy {
    /// Abort the run with an error.
    #[default]
    Fatal,
    /// Skip the batch (no backward, no optimizer step) and continue.
    Skip,
}

/// Early stopping policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStoppingConfig {
    #[serde(default = "default_score_mode")]
    pub mode: ScoreMode,
    /// Number of consecutive non-improving epochs before stopping.
    #[serde(default = "default_patience")]
    pub patience: usize,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            mode: default_score_mode(),
            patience: default_patience(),
        }
    }
}

fn default_score_mode() -> ScoreMode {
    ScoreMode::Max
}

fn default_patience() -> usize {
    3
}

/// Training-loop section of the config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Root directory for run artifacts; the run works in `<dir>/<name>`.
    pub dir: PathBuf,
    /// Run name.
    pub name: String,
    pub batch_size: usize,
    pub num_epochs: usize,
    /// Step the optimizer every N batches instead of every batch.
    #[serde(default)]
    pub gradient_accumulation_step: Option<usize>,
    /// Exclude bias and normalization parameters from weight decay.
    #[serde(default)]
    pub no_bias_decay: bool,
    /// How many most-recent checkpoints to retain.
    #[serde(default = "default_keep_checkpoints")]
    pub keep_checkpoints: usize,
    /// Seed for dataloader shuffling.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub on_non_finite_loss: NonFinitePolicy,
    #[serde(default)]
    pub early_stopping: EarlyStoppingConfig,
}

fn default_keep_checkpoints() -> usize {
    2
}

fn default_seed() -> u64 {
    42
}

/// Evaluation section of the config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub batch_size: usize,
}

/// Dataset section: one base `{name, params}` plus per-split parameter
/// overlays. Each split entry is merged over the base params; the `train`
/// key of the merged params decides whether the split is a training split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    #[serde(default)]
    pub params: Params,
    pub splits: Vec<Params>,
}

/// Transform pipeline section.
///
/// `name == "compose"` is the composition marker: `params.transforms` is
/// then a list of `{name, params}` sub-transforms chained in listed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformsConfig {
    pub name: String,
    #[serde(default)]
    pub params: Params,
    /// Worker count hint for the data-loading collaborator. The in-process
    /// loader is sequential and ignores it; kept so configs stay portable.
    #[serde(default)]
    pub num_preprocessor: usize,
}

impl Default for TransformsConfig {
    fn default() -> Self {
        Self {
            name: "identity".to_string(),
            params: Params::new(),
            num_preprocessor: 0,
        }
    }
}

/// Root configuration for one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub train: TrainConfig,
    pub evaluation: EvaluationConfig,
    pub model: ComponentSpec,
    pub loss: ComponentSpec,
    pub optimizer: ComponentSpec,
    pub scheduler: ComponentSpec,
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub transforms: TransformsConfig,
    #[serde(default = "default_forward_hook")]
    pub forward_hook: ComponentSpec,
    #[serde(default = "default_post_forward_hook")]
    pub post_forward_hook: ComponentSpec,
    #[serde(default = "default_metric_hook")]
    pub metric_hook: ComponentSpec,
    #[serde(default = "default_logger_hook")]
    pub logger_hook: ComponentSpec,
}

fn default_forward_hook() -> ComponentSpec {
    ComponentSpec::named("default")
}

fn default_post_forward_hook() -> ComponentSpec {
    ComponentSpec::named("identity")
}

fn default_metric_hook() -> ComponentSpec {
    ComponentSpec::named("argmax_accuracy")
}

fn default_logger_hook() -> ComponentSpec {
    ComponentSpec::named("scalar")
}

impl ExperimentConfig {
    /// Parse a config from YAML text and validate it.
    pub fn from_yaml_str(text: &str) -> Result<Self, CoreError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a YAML file and validate it.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Working directory for this run: `<train.dir>/<train.name>`.
    pub fn working_dir(&self) -> PathBuf {
        self.train.dir.join(&self.train.name)
    }

    /// Fail fast on structurally invalid configs, before anything is built.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.train.name.is_empty() {
            return Err(CoreError::missing_key("train.name"));
        }
        if self.train.batch_size == 0 {
            return Err(CoreError::config("train.batch_size must be positive"));
        }
        if self.evaluation.batch_size == 0 {
            return Err(CoreError::config("evaluation.batch_size must be positive"));
        }
        if self.train.num_epochs == 0 {
            return Err(CoreError::config("train.num_epochs must be positive"));
        }
        if self.train.gradient_accumulation_step == Some(0) {
            return Err(CoreError::config(
                "train.gradient_accumulation_step must be positive when set",
            ));
        }
        if self.train.keep_checkpoints == 0 {
            return Err(CoreError::config("train.keep_checkpoints must be positive"));
        }
        if self.train.early_stopping.patience == 0 {
            return Err(CoreError::config(
                "train.early_stopping.patience must be positive",
            ));
        }
        if self.dataset.splits.is_empty() {
            return Err(CoreError::config("dataset.splits must not be empty"));
        }
        Ok(())
    }
}

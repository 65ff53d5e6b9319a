//! Datasets, transforms, and the batching dataloader.

pub mod dataset;
pub mod loader;
pub mod transform;

pub use dataset::{Dataset, InMemoryDataset, JsonlDataset};
pub use loader::{DataLoader, LoaderBinding};
pub use transform::{Compose, Normalize, Scale, Transform};

use serde::{Deserialize, Serialize};

/// One labelled example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub features: Vec<f64>,
    pub target: i64,
}

/// A batch of examples in struct-of-arrays form, one feature row and one
/// target per example, in dataset order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<i64>,
}

impl Batch {
    pub fn from_examples(examples: Vec<Example>) -> Self {
        let mut features = Vec::with_capacity(examples.len());
        let mut targets = Vec::with_capacity(examples.len());
        for example in examples {
            features.push(example.features);
            targets.push(example.target);
        }
        Self { features, targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

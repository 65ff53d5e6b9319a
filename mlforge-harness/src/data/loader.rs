//! Batching dataloader.
//!
//! Training loaders shuffle the index permutation each epoch and drop a
//! trailing incomplete batch; evaluation loaders do neither. Batches are
//! always delivered in strict sequential order within an epoch, since
//! logging step numbers derive from batch position.

use crate::data::{Batch, Dataset, Transform};
use crate::error::HarnessError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

pub struct DataLoader {
    dataset: Box<dyn Dataset>,
    transform: Option<Box<dyn Transform>>,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    rng: StdRng,
}

impl DataLoader {
    pub fn new(
        dataset: Box<dyn Dataset>,
        transform: Option<Box<dyn Transform>>,
        batch_size: usize,
        shuffle: bool,
        drop_last: bool,
        seed: u64,
    ) -> Self {
        Self {
            dataset,
            transform,
            batch_size,
            shuffle,
            drop_last,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn dataset_len(&self) -> usize {
        self.dataset.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches one epoch yields: `floor(n / batch_size)` with
    /// drop-last, `ceil(n / batch_size)` without.
    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    /// Materialize one epoch of batches.
    pub fn batches(&mut self) -> Result<Vec<Batch>, HarnessError> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            indices.shuffle(&mut self.rng);
        }

        let mut batches = Vec::with_capacity(self.num_batches());
        for chunk in indices.chunks(self.batch_size) {
            if self.drop_last && chunk.len() < self.batch_size {
                break;
            }
            let mut examples = Vec::with_capacity(chunk.len());
            for &index in chunk {
                let mut example = self.dataset.get(index)?;
                if let Some(transform) = &self.transform {
                    example = transform.apply(example)?;
                }
                examples.push(example);
            }
            batches.push(Batch::from_examples(examples));
        }
        Ok(batches)
    }
}

/// A dataloader tagged with its split mode. Built once at setup.
pub struct LoaderBinding {
    pub is_train: bool,
    pub loader: DataLoader,
}

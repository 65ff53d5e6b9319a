//! Config-driven supervised training harness.
//!
//! A YAML experiment file names every component of a run (model, loss,
//! optimizer, scheduler, dataset, transforms, hooks); the [`Builder`]
//! resolves each name through a [`Registry`](mlforge_core::Registry) and
//! assembles a [`Trainer`], which drives the train/validate/checkpoint
//! loop until the epoch budget or early stopping ends the run.
//!
//! ```no_run
//! use mlforge_core::ExperimentConfig;
//! use mlforge_harness::{Builder, Trainer};
//!
//! # fn main() -> Result<(), mlforge_harness::HarnessError> {
//! let config = ExperimentConfig::from_yaml_file("experiment.yaml")?;
//! let builder = Builder::with_defaults()?;
//! let history = Trainer::new(config, builder)?.run()?;
//! println!("best score: {:?}", history.best_score);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod data;
pub mod error;
pub mod hooks;
pub mod loss;
pub mod model;
pub mod optim;
pub mod sched;
pub mod training;
pub mod writers;

pub use builder::Builder;
pub use error::HarnessError;
pub use training::{RunHistory, Trainer};

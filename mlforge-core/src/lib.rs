//! # mlforge-core — Configuration, Registry & Persistence Foundation
//!
//! This crate provides the foundation the training harness is built on:
//! the declarative configuration tree, the component registry that resolves
//! config names into constructed objects, and atomic JSON persistence.

pub mod config;
pub mod error;
pub mod persistence;
pub mod registry;

pub use config::{ComponentSpec, ExperimentConfig, Params, ScoreMode};
pub use error::CoreError;
pub use registry::Registry;

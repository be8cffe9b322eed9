//! # keel-optimize
//!
//! Demonstration selection for keel agents.
//!
//! The [`Optimizer`] searches subsets of training examples with one of three
//! strategies (`bootstrap`, `random_search`, `iterative_refine`), scoring
//! each candidate with a [`ConfigurationScorer`]. The winning
//! `DemoConfiguration` is persisted through a [`BlobStore`] and loaded by
//! later agent and rating instances.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use keel_optimize::{save_configuration, FileBlobStore, Optimizer};
//!
//! let report = Optimizer::new(scorer, config).optimize(&examples)?;
//! save_configuration(&FileBlobStore::new(".keel"), "agent", &report.configuration)?;
//! ```

pub mod optimizer;
pub mod scorer;
pub mod store;
pub mod strategy;

pub use optimizer::{OptimizationReport, Optimizer};
pub use scorer::{example_metric, ConfigurationScorer, OracleScorer};
pub use store::{load_configuration, save_configuration, BlobStore, FileBlobStore, InMemoryBlobStore};
pub use strategy::RoundProgress;

//! # keel-memory
//!
//! The agent's long-lived memory: a single text blob updated by ordered
//! search/replace edits that the oracle proposes.
//!
//! Edit proposals never fail. When the oracle's answer is not a usable edit
//! list, the observation is appended instead and a warning is logged.

pub mod edit;
pub mod store;

pub use edit::{apply_edits, parse_edits, MemoryEdit};
pub use store::{memory_signature, MemoryStore};

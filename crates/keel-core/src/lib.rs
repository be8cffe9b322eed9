//! # keel-core
//!
//! The observe → plan → act runtime for keel agents.
//!
//! This crate provides:
//! - The collaborator traits (`Oracle`, `Codec`, `OperationExecutor`,
//!   `ConfirmationGate`, `OperationPolicy`, `TraceSink`)
//! - The `StateMachine` that drives them one iteration at a time
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keel_core::{StateMachine, traits::{Oracle, Codec, OperationExecutor}};
//! ```

pub mod cancel;
pub mod machine;
pub mod traits;

pub use cancel::CancelToken;
pub use machine::{agent_signature, StateMachine, INPUT_FIELD, OUTPUT_FIELD};

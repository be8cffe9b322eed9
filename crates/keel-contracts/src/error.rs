//! Error types for the keel runtime.
//!
//! `KeelError` covers failures that stop an operation outright.
//! `DocumentError` is the codec's result type: malformed oracle output is
//! expected and is handled by the state machine, never thrown past it.

use thiserror::Error;

/// The unified error type for the keel runtime.
#[derive(Debug, Error)]
pub enum KeelError {
    /// The oracle call failed or timed out.
    #[error("oracle call failed: {reason}")]
    RemoteFailure { reason: String },

    /// The trace sink could not record an event.
    ///
    /// Fatal for the step: an iteration that cannot be traced does not proceed.
    #[error("trace write failed: {reason}")]
    TraceWriteFailed { reason: String },

    /// Saving or loading a demonstration configuration failed.
    #[error("persistence error: {reason}")]
    Persistence { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// The state machine was driven from an illegal state.
    #[error("state machine error: {reason}")]
    StateMachineError { reason: String },

    /// An optimizer was given nothing to work with.
    #[error("optimization error: {reason}")]
    Optimization { reason: String },
}

/// Convenience alias used throughout the keel crates.
pub type KeelResult<T> = Result<T, KeelError>;

/// Why an oracle response could not be turned into a `ResponseDocument`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// The text is not well-formed markup.
    #[error("malformed document at line {line}, column {column}: {cause}")]
    Malformed { line: usize, column: usize, cause: String },

    /// Well-formed, but a required field is missing or holds an invalid value.
    #[error("schema violation in '{field}': {message}")]
    Schema { field: String, message: String },
}

impl DocumentError {
    pub fn schema(field: impl Into<String>, message: impl Into<String>) -> Self {
        DocumentError::Schema { field: field.into(), message: message.into() }
    }

    /// The offending field, for schema errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            DocumentError::Schema { field, .. } => Some(field),
            DocumentError::Malformed { .. } => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, DocumentError::Malformed { .. })
    }
}

//! Request and response documents exchanged with the oracle.

use serde::{Deserialize, Serialize};

use crate::{error::DocumentError, operation::Operation, plan::Plan};

/// An encoded snapshot of `AgentState`, ready to hand to the oracle.
///
/// Built fresh every iteration and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDocument(pub String);

impl RequestDocument {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A response that passed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseDocument {
    pub updated_memory: String,
    pub new_plan: Plan,
    /// Dispatched in this order.
    pub execution_instructions: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
    pub done: bool,
}

/// Result of a pure structural check over raw oracle output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// "ok" when valid, otherwise the first violation.
    pub message: String,
}

/// The outcome of one best-effort repair pass.
///
/// When `unresolved` is true the document is still invalid and `error`
/// says why; callers must not treat it as a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairedDocument {
    /// The document text after default fields were injected.
    pub text: String,
    /// The decoded document, present only when repair succeeded.
    pub document: Option<ResponseDocument>,
    /// Names of the fields that received default values.
    pub injected: Vec<String>,
    pub unresolved: bool,
    pub error: Option<DocumentError>,
}

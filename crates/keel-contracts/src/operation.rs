//! Operations the oracle asks the runtime to perform.
//!
//! Operations are dispatched in document order. `Message` is informational;
//! `Command` and `WriteFile` have side effects and always pass through the
//! operation policy and the confirmation gate first.

use serde::{Deserialize, Serialize};

/// One unit of agent-requested action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Run a shell command.
    Command { text: String },
    /// Write `content` to `path`, replacing any existing file.
    WriteFile { path: String, content: String },
    /// Free text for the operator.
    Message { text: String },
}

impl Operation {
    /// The wire literal for this operation's `type` attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Command { .. } => "command",
            Operation::WriteFile { .. } => "file",
            Operation::Message { .. } => "message",
        }
    }

    /// True for operations that touch the outside world.
    pub fn has_side_effects(&self) -> bool {
        !matches!(self, Operation::Message { .. })
    }

    /// The string policy rules match against: the command text, the file
    /// path, or the message text.
    pub fn target(&self) -> &str {
        match self {
            Operation::Command { text } => text,
            Operation::WriteFile { path, .. } => path,
            Operation::Message { text } => text,
        }
    }

    /// One-line description shown to the operator at the confirmation prompt.
    pub fn describe(&self) -> String {
        match self {
            Operation::Command { text } => format!("run command: {text}"),
            Operation::WriteFile { path, content } => {
                format!("write {} bytes to {path}", content.len())
            }
            Operation::Message { text } => format!("message: {text}"),
        }
    }
}

/// What an executor reports back after running an operation.
///
/// Failures (nonzero exit, unwritable path) are data, not errors: they are
/// folded into the next observation so the oracle can react to them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { output: output.into(), error: None }
    }

    pub fn failed(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self { output: output.into(), error: Some(error.into()) }
    }
}

/// The policy decision for a side-effecting operation.
///
/// No variant skips the confirmation gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationVerdict {
    /// Ask the confirmation gate.
    Confirm,
    /// Refuse without asking.
    Deny { reason: String },
}

/// How one dispatched operation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchResult {
    /// A message was surfaced; nothing ran.
    Informational,
    /// The policy refused the operation.
    Denied { reason: String },
    /// The operator declined at the confirmation prompt.
    Declined,
    /// The executor ran the operation.
    Executed { outcome: OperationOutcome },
}

//! Iteration results, run status, and trace records.
//!
//! `StepResult` is what the state machine returns after each iteration.
//! `TraceEvent` is what it hands to the trace sink along the way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    agent::{AgentState, RunId},
    document::ResponseDocument,
    operation::{DispatchResult, Operation},
};

/// Why a run stopped before the oracle declared it done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// The response could not be decoded, and repair either did not apply
    /// or left it invalid.
    ParseFailure {
        /// "decode" when repair was not attempted, "repair" otherwise.
        stage: String,
        /// The first offending field, when the failure was a schema error.
        field: Option<String>,
        message: String,
        /// The oracle output exactly as received.
        raw: String,
    },
    /// The oracle call itself failed.
    RemoteFailure { message: String },
    /// The caller cancelled the run.
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::ParseFailure { stage, field: Some(field), message, .. } => {
                write!(f, "parse failure at {stage} (field '{field}'): {message}")
            }
            AbortReason::ParseFailure { stage, field: None, message, .. } => {
                write!(f, "parse failure at {stage}: {message}")
            }
            AbortReason::RemoteFailure { message } => write!(f, "oracle call failed: {message}"),
            AbortReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// The three states a run can be in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Done,
    Aborted { reason: AbortReason },
}

/// The outcome of a single iteration.
#[derive(Debug)]
pub enum StepResult {
    /// The response was applied and the oracle is not done yet.
    Continued {
        next_state: AgentState,
        response: ResponseDocument,
    },
    /// The oracle declared the task complete.
    Done {
        final_state: AgentState,
        response: ResponseDocument,
    },
    /// The run cannot continue. `state` is the state from before the
    /// iteration; nothing from the failed iteration was applied.
    Aborted { reason: AbortReason, state: AgentState },
}

/// Summary returned by a full run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub final_state: AgentState,
    pub status: RunStatus,
    /// Iterations in which the oracle was called.
    pub iterations: u64,
}

/// What happened at one point of an iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceKind {
    Request { document: String },
    Response { raw: String },
    Validation { valid: bool, message: String },
    Repair { injected: Vec<String>, unresolved: bool },
    Dispatch { index: usize, operation: Operation, result: DispatchResult },
    Transition { status: RunStatus },
}

/// One record in a run's trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub run_id: String,
    /// Zero-based iteration this event belongs to.
    pub iteration: u64,
    pub kind: TraceKind,
    pub timestamp: DateTime<Utc>,
}

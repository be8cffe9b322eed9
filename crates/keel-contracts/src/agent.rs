//! Agent run identity and the state threaded between iterations.
//!
//! `AgentState` is owned by the state machine for the lifetime of one run.
//! Collaborators only ever see snapshots of it.

use serde::{Deserialize, Serialize};

use crate::plan::Plan;

/// Unique identifier for a single agent run.
///
/// Appears in every trace event so a run's history can be reassembled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub uuid::Uuid);

impl RunId {
    /// Create a new, unique run ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The previous plan as carried into the next request.
///
/// Before the oracle has produced anything the plan is caller-supplied text
/// (typically `<plan></plan>`); afterwards it is the structured plan taken
/// from the last accepted response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", content = "value", rename_all = "snake_case")]
pub enum LastPlan {
    Raw(String),
    Structured(Plan),
}

impl Default for LastPlan {
    fn default() -> Self {
        LastPlan::Raw(String::new())
    }
}

/// Everything the agent carries from one iteration to the next.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgentState {
    /// Accumulated knowledge, rewritten by the oracle each iteration.
    pub memory: String,
    /// The plan the oracle emitted last time.
    pub last_plan: LastPlan,
    /// Marker describing what the runtime did with the last response.
    pub last_action: String,
    /// Results of the operations dispatched last iteration, or the task
    /// text on the first iteration.
    pub observation: String,
    /// Set once the oracle declares the task complete.
    pub done: bool,
}

impl AgentState {
    /// The state a fresh run starts from: empty memory, the given initial
    /// plan text, and the task as the first observation.
    pub fn initial(task: impl Into<String>, initial_plan: impl Into<String>) -> Self {
        Self {
            memory: String::new(),
            last_plan: LastPlan::Raw(initial_plan.into()),
            last_action: String::new(),
            observation: task.into(),
            done: false,
        }
    }
}

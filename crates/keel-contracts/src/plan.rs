//! Structured plans emitted by the oracle.

use serde::{Deserialize, Serialize};

/// One step of a plan. `id` is unique within its plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: u32,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A goal plus an ordered list of steps and a cursor into them.
///
/// A decoded plan always satisfies two invariants: step ids are unique, and
/// `current_step_id`, when present, names one of the steps. Documents that
/// violate either are rejected by the codec as schema errors.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub steps: Vec<PlanStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<u32>,
}

impl Plan {
    /// Look up a step by id.
    pub fn step(&self, id: u32) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// The step `current_step_id` points at, if any.
    pub fn current_step(&self) -> Option<&PlanStep> {
        self.current_step_id.and_then(|id| self.step(id))
    }
}

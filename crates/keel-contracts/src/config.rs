//! Explicit configuration objects.
//!
//! Every component takes its configuration through its constructor; there is
//! no process-wide settings object.

use serde::{Deserialize, Serialize};

use crate::demo::StrategyKind;

pub const DEFAULT_AGENT_INSTRUCTIONS: &str = "You are an autonomous agent. Read the agent_state \
document, then answer with an agent_output document containing updated_memory, new_plan, \
execution_instructions, expected_outcome and done. Escape <, > and & inside text.";

pub const DEFAULT_RATING_INSTRUCTIONS: &str = "Rate the pipeline output across multiple \
criteria. Be harsh in your rating and deduct a point for every issue. Give each score as a \
single integer from 1 to 9 and provide detailed reasoning for each score.";

/// Settings for the agent state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub instructions: String,
    /// Written to `AgentState::last_action` after every applied response.
    pub last_action_marker: String,
    /// `last_plan` text for the first request of a run.
    pub initial_plan: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_AGENT_INSTRUCTIONS.to_string(),
            last_action_marker: "executed_instructions".to_string(),
            initial_plan: "<plan></plan>".to_string(),
        }
    }
}

/// Settings for the rating function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    pub instructions: String,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self { instructions: DEFAULT_RATING_INSTRUCTIONS.to_string() }
    }
}

/// Search budget and shape for the demonstration optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub strategy: StrategyKind,
    /// Upper bound on demonstrations in any candidate configuration.
    pub max_demos: usize,
    /// Proposal rounds per bootstrap run or refine run.
    pub max_rounds: usize,
    /// Independent bootstrap runs for random search.
    pub num_candidates: usize,
    /// Share of examples held out to score candidates.
    pub validation_fraction: f64,
    pub seed: u64,
    /// Worker threads random search may use to score candidates.
    pub concurrency: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Bootstrap,
            max_demos: 8,
            max_rounds: 4,
            num_candidates: 5,
            validation_fraction: 0.25,
            seed: 0,
            concurrency: 1,
        }
    }
}

/// How the CLI reaches a model: an external program that reads a prompt on
/// stdin and writes the completion to stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub command: String,
    pub args: Vec<String>,
    pub model: Option<String>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: "llm".to_string(),
            args: Vec::new(),
            model: None,
        }
    }
}

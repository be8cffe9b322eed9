//! Training examples and the demonstration configurations chosen from them.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A labeled (input, output) document pair. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub input_document: String,
    pub output_document: String,
}

impl Example {
    pub fn new(input_document: impl Into<String>, output_document: impl Into<String>) -> Self {
        Self {
            input_document: input_document.into(),
            output_document: output_document.into(),
        }
    }
}

/// Which search the optimizer ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Bootstrap,
    RandomSearch,
    IterativeRefine,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Bootstrap => "bootstrap",
            StrategyKind::RandomSearch => "random_search",
            StrategyKind::IterativeRefine => "iterative_refine",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "bootstrap" => Ok(StrategyKind::Bootstrap),
            "random_search" => Ok(StrategyKind::RandomSearch),
            "iterative_refine" => Ok(StrategyKind::IterativeRefine),
            other => Err(format!(
                "unknown strategy '{other}' (expected bootstrap, random_search or iterative_refine)"
            )),
        }
    }
}

/// The winning demonstrations plus how they were found.
///
/// Written once by the optimizer and treated as read-only by every agent or
/// rating instance that loads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoConfiguration {
    pub demos: Vec<Example>,
    pub strategy: StrategyKind,
    /// Proposal rounds (or candidates, for random search) actually spent.
    pub rounds: usize,
    /// Mean metric over the validation slice, in [0, 1].
    pub score: f64,
    pub seed: u64,
    pub created_at: DateTime<Utc>,
}

//! The keel settings file.
//!
//! One TOML document configures every component. Every table is optional
//! and falls back to its defaults:
//!
//! ```toml
//! [agent]
//! last_action_marker = "executed_instructions"
//!
//! [optimizer]
//! strategy = "random_search"
//! num_candidates = 8
//! concurrency = 4
//!
//! [oracle]
//! command = "llm"
//! args = ["-m", "gpt-4o-mini"]
//!
//! [[rules]]
//! id = "no-sudo"
//! kind = "command"
//! pattern = "sudo"
//! verdict = "deny"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use keel_contracts::{
    config::{AgentConfig, OptimizerConfig, OracleConfig, RatingConfig},
    error::{KeelError, KeelResult},
};

use crate::{engine::TomlOperationPolicy, rule::OperationRule};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelSettings {
    pub agent: AgentConfig,
    pub rating: RatingConfig,
    pub optimizer: OptimizerConfig,
    pub oracle: OracleConfig,
    pub rules: Vec<OperationRule>,
}

impl KeelSettings {
    pub fn from_toml_str(s: &str) -> KeelResult<Self> {
        let settings: Self = toml::from_str(s).map_err(|e| KeelError::ConfigError {
            reason: format!("failed to parse settings TOML: {e}"),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> KeelResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| KeelError::ConfigError {
            reason: format!("failed to read settings file '{}': {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> KeelResult<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> KeelResult<()> {
        let fraction = self.optimizer.validation_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(config_error(format!(
                "optimizer.validation_fraction must be in (0, 1], got {fraction}"
            )));
        }
        if self.optimizer.concurrency == 0 {
            return Err(config_error("optimizer.concurrency must be at least 1"));
        }
        if self.oracle.command.trim().is_empty() {
            return Err(config_error("oracle.command must not be empty"));
        }
        if let Some(rule) = self.rules.iter().find(|r| r.pattern.is_empty()) {
            return Err(config_error(format!("rule '{}' has an empty pattern", rule.id)));
        }
        Ok(())
    }

    pub fn policy(&self) -> TomlOperationPolicy {
        TomlOperationPolicy::new(self.rules.clone())
    }
}

fn config_error(reason: impl Into<String>) -> KeelError {
    KeelError::ConfigError { reason: reason.into() }
}

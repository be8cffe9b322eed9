//! TOML-driven operation policy.
//!
//! `TomlOperationPolicy` implements the `OperationPolicy` trait from
//! keel-core. Evaluation:
//!
//! 1. Iterate rules in declaration order.
//! 2. The first rule that matches the operation's kind and target decides:
//!    `confirm` sends it to the operator, `deny` refuses it.
//! 3. No match → `Confirm`.
//!
//! No verdict skips the operator: the policy can only refuse more.

use std::path::Path;

use tracing::{debug, warn};

use keel_contracts::{
    error::{KeelError, KeelResult},
    operation::{Operation, OperationVerdict},
};
use keel_core::traits::OperationPolicy;

use crate::rule::{OperationRule, OperationRules, RuleVerdict};

#[derive(Debug, Clone, Default)]
pub struct TomlOperationPolicy {
    rules: Vec<OperationRule>,
}

impl TomlOperationPolicy {
    pub fn new(rules: Vec<OperationRule>) -> Self {
        Self { rules }
    }

    /// Parse a TOML document holding a `[[rules]]` array.
    pub fn from_toml_str(s: &str) -> KeelResult<Self> {
        let parsed: OperationRules = toml::from_str(s).map_err(|e| KeelError::ConfigError {
            reason: format!("failed to parse policy TOML: {e}"),
        })?;
        Ok(Self::new(parsed.rules))
    }

    pub fn from_file(path: &Path) -> KeelResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| KeelError::ConfigError {
            reason: format!("failed to read policy file '{}': {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn rules(&self) -> &[OperationRule] {
        &self.rules
    }
}

impl OperationPolicy for TomlOperationPolicy {
    fn evaluate(&self, operation: &Operation) -> KeelResult<OperationVerdict> {
        debug!(kind = operation.kind(), target = %operation.target(), "evaluating operation policy");

        let Some(rule) = self.rules.iter().find(|r| r.matches(operation)) else {
            return Ok(OperationVerdict::Confirm);
        };

        match rule.verdict {
            RuleVerdict::Confirm => {
                debug!(rule_id = %rule.id, "rule sends operation to confirmation");
                Ok(OperationVerdict::Confirm)
            }
            RuleVerdict::Deny => {
                warn!(rule_id = %rule.id, target = %operation.target(), "rule denies operation");
                Ok(OperationVerdict::Deny {
                    reason: rule
                        .deny_reason
                        .clone()
                        .unwrap_or_else(|| format!("denied by rule '{}'", rule.id)),
                })
            }
        }
    }
}

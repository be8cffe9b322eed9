//! Operation rule types and configuration schema.
//!
//! An `OperationRules` list is deserialized from TOML. Rules are evaluated
//! in declaration order and the first matching rule wins. If no rule
//! matches, the operation goes to the confirmation gate.

use serde::{Deserialize, Serialize};

use keel_contracts::operation::Operation;

/// What a matching rule does with an operation.
///
/// ```toml
/// verdict = "confirm"
/// verdict = "deny"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleVerdict {
    /// Ask the operator.
    Confirm,
    /// Refuse without asking.
    Deny,
}

/// Which operations a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleKind {
    #[serde(rename = "command")]
    Command,
    #[serde(rename = "file")]
    File,
    #[serde(rename = "*")]
    Any,
}

/// A single operation rule loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRule {
    /// Stable identifier used in logs and refusal messages.
    pub id: String,

    #[serde(default)]
    pub description: String,

    pub kind: RuleKind,

    /// `"*"` matches anything; otherwise a case-sensitive substring of the
    /// command text or the file path.
    pub pattern: String,

    pub verdict: RuleVerdict,

    /// Shown to the oracle in the next observation when the rule denies.
    pub deny_reason: Option<String>,
}

impl OperationRule {
    /// True if this rule applies to `operation`. Messages never match.
    pub fn matches(&self, operation: &Operation) -> bool {
        let kind_matches = match (self.kind, operation) {
            (_, Operation::Message { .. }) => false,
            (RuleKind::Any, _) => true,
            (RuleKind::Command, Operation::Command { .. }) => true,
            (RuleKind::File, Operation::WriteFile { .. }) => true,
            _ => false,
        };
        kind_matches && (self.pattern == "*" || operation.target().contains(&self.pattern))
    }
}

/// The `[[rules]]` array of a settings or policy file.
///
/// ```toml
/// [[rules]]
/// id = "no-rm-rf"
/// description = "Never delete recursively"
/// kind = "command"
/// pattern = "rm -rf"
/// verdict = "deny"
/// deny_reason = "recursive deletion is not allowed"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRules {
    #[serde(default)]
    pub rules: Vec<OperationRule>,
}

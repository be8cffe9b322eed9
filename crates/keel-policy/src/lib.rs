//! # keel-policy
//!
//! TOML configuration for the keel runtime: the operation policy and the
//! settings file.
//!
//! ## Overview
//!
//! [`TomlOperationPolicy`] implements the
//! [`OperationPolicy`](keel_core::traits::OperationPolicy) trait. Rules are
//! declared in TOML, evaluated in order, and the first matching rule wins.
//! With no match the operation is sent to the operator for confirmation.
//!
//! [`KeelSettings`] reads the `[agent]`, `[rating]`, `[optimizer]` and
//! `[oracle]` tables plus the `[[rules]]` array from one file.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use keel_policy::KeelSettings;
//!
//! let settings = KeelSettings::load_or_default(Path::new("keel.toml"))?;
//! let policy = settings.policy();
//! ```
//!
//! ## Rule matching
//!
//! Each rule names a `kind` (`command`, `file` or `*`) and a `pattern`.
//! The pattern `"*"` matches any target; anything else must occur in the
//! command text or file path.

pub mod engine;
pub mod rule;
pub mod settings;

pub use engine::TomlOperationPolicy;
pub use rule::{OperationRule, OperationRules, RuleKind, RuleVerdict};
pub use settings::KeelSettings;

// ── Tests ─────────────────────────────────────────────────────────────────────

//! # keel-codec
//!
//! The markup wire format between the keel state machine and the oracle.
//!
//! This crate provides [`XmlCodec`], which implements
//! [`keel_core::traits::Codec`]. Oracle output goes through three separable
//! stages:
//!
//! 1. **Parse**: a strict fragment reader ([`xml`]). Bare `&` or `<` in text
//!    is a malformed document with a line and column.
//! 2. **Extract**: required fields are checked in wire order ([`schema`]);
//!    the first violation is named.
//! 3. **Repair**: schema gaps get default values once ([`repair`]).
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use keel_codec::{validate, XmlCodec};
//!
//! let report = validate("<agent_output><done>true</done></agent_output>");
//! assert!(!report.valid); // updated_memory is missing
//! ```

pub mod render;
pub mod repair;
pub mod schema;
pub mod xml;

#[cfg(test)]
mod scenarios;

use keel_contracts::{
    agent::AgentState,
    document::{RepairedDocument, RequestDocument, ResponseDocument, ValidationReport},
    error::DocumentError,
};
use keel_core::traits::Codec;

pub use render::{encode_request, output_format_example, render_plan, render_response};
pub use xml::escape;

/// The markup codec used by the agent runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlCodec;

impl XmlCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Codec for XmlCodec {
    fn encode(&self, state: &AgentState) -> RequestDocument {
        encode_request(state)
    }

    fn decode(&self, raw: &str) -> Result<ResponseDocument, DocumentError> {
        decode(raw)
    }

    fn repair(&self, raw: &str) -> RepairedDocument {
        repair::repair(raw)
    }

    fn validate(&self, raw: &str) -> ValidationReport {
        validate(raw)
    }
}

/// Parse and extract a response document from raw oracle output.
pub fn decode(raw: &str) -> Result<ResponseDocument, DocumentError> {
    let source = strip_code_fence(raw);
    let nodes = xml::parse_fragment(source)?;
    if !nodes.iter().any(|n| matches!(n, xml::Node::Element(_))) {
        return Err(empty_document());
    }
    schema::extract(&nodes)
}

/// Structural check with no side effects.
pub fn validate(raw: &str) -> ValidationReport {
    match decode(raw) {
        Ok(_) => ValidationReport { valid: true, message: "ok".to_string() },
        Err(e) => ValidationReport { valid: false, message: e.to_string() },
    }
}

/// Drop a surrounding Markdown code fence, if the whole output is fenced.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return raw;
    };
    let Some(newline) = rest.find('\n') else {
        return raw;
    };
    let body = &rest[newline + 1..];
    body.strip_suffix("```").unwrap_or(body).trim_end()
}

pub(crate) fn empty_document() -> DocumentError {
    DocumentError::Malformed { line: 1, column: 1, cause: "document is empty".to_string() }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use keel_contracts::{
        document::ResponseDocument,
        error::DocumentError,
        operation::Operation,
        plan::{Plan, PlanStep},
    };

    use super::{decode, render_response, strip_code_fence, validate};

    fn sample() -> ResponseDocument {
        ResponseDocument {
            updated_memory: "Saw three files & a <dir>".to_string(),
            new_plan: Plan {
                goal: "Summarize \"notes\"".to_string(),
                steps: vec![
                    PlanStep { id: 1, action: "List files".into(), reason: Some("orient".into()) },
                    PlanStep { id: 2, action: "Read 'a.txt'".into(), reason: None },
                ],
                current_step_id: Some(2),
            },
            execution_instructions: vec![
                Operation::Command { text: "grep -c x a.txt > out && cat out".into() },
                Operation::WriteFile { path: "dir/b.txt".into(), content: "  two\nlines \n".into() },
                Operation::Message { text: "progress".into() },
            ],
            expected_outcome: Some("a count".into()),
            done: false,
        }
    }

    #[test]
    fn render_then_decode_is_identity() {
        let doc = sample();
        assert_eq!(decode(&render_response(&doc)).unwrap(), doc);

        let finished = ResponseDocument { done: true, expected_outcome: None, ..doc };
        assert_eq!(decode(&render_response(&finished)).unwrap(), finished);
    }

    #[test]
    fn whitespace_in_text_fields_round_trips() {
        let doc = ResponseDocument {
            updated_memory: "line one\n".to_string(),
            new_plan: Plan {
                goal: " g".to_string(),
                steps: vec![PlanStep { id: 1, action: "  indented".into(), reason: Some("why \n".into()) }],
                current_step_id: Some(1),
            },
            execution_instructions: vec![
                Operation::Command { text: "echo hi ".into() },
                Operation::Message { text: "\tdone".into() },
            ],
            expected_outcome: Some(" hi\n".into()),
            done: true,
        };
        assert_eq!(decode(&render_response(&doc)).unwrap(), doc);
    }

    #[test]
    fn unescaped_reserved_characters_are_malformed() {
        let raw = render_response(&sample()).replace("&amp; a &lt;dir&gt;", "& a <dir>");
        let err = decode(&raw).unwrap_err();
        assert!(err.is_malformed(), "{err:?}");
        assert!(!validate(&raw).valid);
    }

    #[test]
    fn empty_output_is_malformed() {
        assert_eq!(
            decode("  \n "),
            Err(DocumentError::Malformed { line: 1, column: 1, cause: "document is empty".into() })
        );
    }

    #[test]
    fn fenced_output_is_accepted() {
        let fenced = format!("```xml\n{}\n```\n", render_response(&sample()));
        assert_eq!(decode(&fenced).unwrap(), sample());
        assert_eq!(strip_code_fence("no fence"), "no fence");
    }

    #[test]
    fn validate_reports_first_violation() {
        let report = validate("<agent_output><done>true</done></agent_output>");
        assert!(!report.valid);
        assert!(report.message.contains("updated_memory"), "{}", report.message);

        let ok = validate(&render_response(&sample()));
        assert!(ok.valid);
        assert_eq!(ok.message, "ok");
    }
}

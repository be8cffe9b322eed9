//! Single-pass structural repair.
//!
//! Only schema errors are candidates: missing required fields (and an empty
//! `new_plan` or `done`) get default values, the document is re-serialized
//! in canonical form and decoded again. Malformed input, bad values and
//! anything the defaults cannot fix come back unresolved. Repair never
//! drops an element it was given: elements beside the root are carried
//! over as they are, and input whose fields cannot be placed (several
//! roots, or a root nested among the fields) is left unresolved.

use tracing::debug;

use keel_contracts::document::RepairedDocument;
use keel_contracts::error::DocumentError;

use crate::render::operations_element;
use crate::schema::{
    self, done_field, field, DONE, DONE_LEGACY, EXECUTION_INSTRUCTIONS, NEW_PLAN, ROOT, UPDATED_MEMORY,
};
use crate::xml::{parse_fragment, Element};
use crate::strip_code_fence;

pub const DEFAULT_MEMORY: &str = "No memory updates.";
pub const DEFAULT_GOAL: &str = "Continue the task";
pub const DEFAULT_ACTION: &str = "Review the latest observation and decide the next action";

/// Attempt one repair of `raw`.
pub fn repair(raw: &str) -> RepairedDocument {
    let source = strip_code_fence(raw);

    let nodes = match parse_fragment(source) {
        Ok(nodes) if nodes.iter().any(|n| matches!(n, crate::xml::Node::Element(_))) => nodes,
        Ok(_) => return unresolved(raw, crate::empty_document()),
        Err(e) => return unresolved(raw, e),
    };

    let schema_error = match schema::extract(&nodes) {
        Ok(document) => {
            return RepairedDocument {
                text: source.to_string(),
                document: Some(document),
                injected: vec![],
                unresolved: false,
                error: None,
            }
        }
        Err(e @ DocumentError::Malformed { .. }) => return unresolved(raw, e),
        Err(e @ DocumentError::Schema { .. }) => e,
    };

    let fields = schema::fields(&nodes);
    if fields.iter().any(|e| e.name == ROOT) {
        debug!("response has more than one root; not repairing");
        return unresolved(raw, schema_error);
    }
    let mut injected = Vec::new();
    let mut rebuilt = Element::new(ROOT);

    // Keep every field that is present and usable, in its original order.
    for el in &fields {
        let gap = match el.name.as_str() {
            NEW_PLAN | DONE | DONE_LEGACY => el.is_blank(),
            _ => false,
        };
        if !gap {
            rebuilt.children.push(crate::xml::Node::Element((*el).clone()));
        }
    }

    let present = |name: &str| match name {
        DONE => done_field(&fields).is_some_and(|e| !e.is_blank()),
        NEW_PLAN => field(&fields, NEW_PLAN).is_some_and(|e| !e.is_blank()),
        other => field(&fields, other).is_some(),
    };

    for name in [UPDATED_MEMORY, NEW_PLAN, EXECUTION_INSTRUCTIONS, DONE] {
        if present(name) {
            continue;
        }
        rebuilt = rebuilt.with_child(default_field(name));
        injected.push(name.to_string());
    }

    let mut text = rebuilt.to_markup();
    for sibling in schema::siblings(&nodes) {
        text.push('\n');
        text.push_str(&sibling.to_markup());
    }
    if injected.is_empty() {
        // Nothing was missing; the schema error is about a value.
        return RepairedDocument { text, document: None, injected, unresolved: true, error: Some(schema_error) };
    }

    debug!(fields = ?injected, "injected default fields");

    let result = parse_fragment(&text).and_then(|nodes| schema::extract(&nodes));
    match result {
        Ok(document) => RepairedDocument {
            text,
            document: Some(document),
            injected,
            unresolved: false,
            error: None,
        },
        Err(error) => RepairedDocument {
            text,
            document: None,
            injected,
            unresolved: true,
            error: Some(error),
        },
    }
}

fn default_field(name: &str) -> Element {
    match name {
        UPDATED_MEMORY => Element::new(UPDATED_MEMORY).with_text(DEFAULT_MEMORY),
        NEW_PLAN => Element::new(NEW_PLAN).with_child(
            Element::new("plan")
                .with_child(Element::new("goal").with_text(DEFAULT_GOAL))
                .with_child(
                    Element::new("steps").with_child(
                        Element::new("step")
                            .with_attribute("id", "1")
                            .with_child(Element::new("action").with_text(DEFAULT_ACTION)),
                    ),
                )
                .with_child(Element::new("current_step_id").with_text("1")),
        ),
        EXECUTION_INSTRUCTIONS => operations_element(&[]),
        _ => Element::new(DONE).with_text("false"),
    }
}

fn unresolved(raw: &str, error: DocumentError) -> RepairedDocument {
    RepairedDocument {
        text: raw.to_string(),
        document: None,
        injected: vec![],
        unresolved: true,
        error: Some(error),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Search/replace edits over the memory text, and parsing of edit lists
//! proposed by the oracle.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// One literal substring replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEdit {
    pub search: String,
    pub replace: String,
}

impl MemoryEdit {
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self { search: search.into(), replace: replace.into() }
    }

    /// An edit that appends `text` to the memory.
    pub fn append(text: impl Into<String>) -> Self {
        Self::new("", text)
    }
}

/// Apply `edits` in order, each to the result of the one before.
///
/// A non-empty `search` replaces every occurrence; one that does not occur
/// changes nothing. An empty `search` appends `replace`, on a new line when
/// the text is not empty.
pub fn apply_edits(text: &str, edits: &[MemoryEdit]) -> String {
    edits.iter().fold(text.to_string(), |current, edit| {
        if edit.search.is_empty() {
            if current.is_empty() {
                edit.replace.clone()
            } else {
                format!("{current}\n{}", edit.replace)
            }
        } else if current.contains(&edit.search) {
            current.replace(&edit.search, &edit.replace)
        } else {
            debug!(search = %edit.search, "edit target not found, skipping");
            current
        }
    })
}

fn edit_list_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "required": ["search", "replace"],
            "properties": {
                "search": { "type": "string" },
                "replace": { "type": "string" }
            }
        }
    })
}

/// Parse the oracle's edit list. Returns `None` for anything that is not a
/// JSON list of `{search, replace}` string pairs; a lone object counts as
/// a one-element list.
pub fn parse_edits(raw: &str) -> Option<Vec<MemoryEdit>> {
    let body = strip_fence(raw);
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "edit list is not JSON");
            return None;
        }
    };
    let list = match value {
        Value::Object(_) => Value::Array(vec![value]),
        other => other,
    };

    let schema = edit_list_schema();
    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "edit list schema failed to compile");
            return None;
        }
    };
    if let Some(error) = validator.iter_errors(&list).next() {
        debug!(path = %error.instance_path, error = %error, "edit list does not match schema");
        return None;
    }

    serde_json::from_value(list).ok()
}

fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json) along with the opening line.
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

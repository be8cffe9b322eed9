//! The memory text blob and its oracle-driven updates.

use tracing::{debug, warn};

use keel_contracts::oracle::{FieldSpec, OracleRequest, Signature};
use keel_core::traits::Oracle;

use crate::edit::{apply_edits, parse_edits, MemoryEdit};

pub const MEMORY_FIELD: &str = "memory";
pub const OBSERVATION_FIELD: &str = "observation";
pub const EDITS_FIELD: &str = "search_replace_ops";

pub fn memory_signature() -> Signature {
    Signature {
        name: "memory_update".to_string(),
        instructions: "Generate search-and-replace operations to update memory based on an \
                       observation. Answer with a JSON list of objects with string keys \
                       'search' and 'replace'. An empty 'search' appends 'replace'."
            .to_string(),
        inputs: vec![
            FieldSpec::new(MEMORY_FIELD, "Current memory as a string"),
            FieldSpec::new(OBSERVATION_FIELD, "New information to incorporate"),
        ],
        outputs: vec![FieldSpec::new(
            EDITS_FIELD,
            "List of JSON dicts with 'search' and 'replace' keys",
        )],
    }
}

/// A single memory blob, updated through oracle-proposed edits.
pub struct MemoryStore {
    oracle: Box<dyn Oracle>,
    text: String,
}

impl MemoryStore {
    pub fn new(oracle: Box<dyn Oracle>) -> Self {
        Self { oracle, text: String::new() }
    }

    /// Start from previously saved memory.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn show(&self) -> &str {
        &self.text
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Ask the oracle how to fold `observation` into the current memory.
    ///
    /// Never fails: an oracle error or an unusable answer yields a single
    /// append of the observation.
    pub fn propose_edits(&self, observation: &str) -> Vec<MemoryEdit> {
        let request = OracleRequest::new(memory_signature())
            .with_input(MEMORY_FIELD, self.text.clone())
            .with_input(OBSERVATION_FIELD, observation);

        let raw = match self.oracle.invoke(&request) {
            Ok(outputs) => outputs.get(EDITS_FIELD).unwrap_or_default().to_string(),
            Err(e) => {
                warn!(error = %e, "memory oracle failed, appending observation");
                return vec![MemoryEdit::append(observation)];
            }
        };

        match parse_edits(&raw) {
            Some(edits) => {
                debug!(count = edits.len(), "memory edits proposed");
                edits
            }
            None => {
                warn!(raw_len = raw.len(), "memory edits unparsable, appending observation");
                vec![MemoryEdit::append(observation)]
            }
        }
    }

    /// Propose edits for `observation` and apply them. Returns the new text.
    pub fn add(&mut self, observation: &str) -> &str {
        let edits = self.propose_edits(observation);
        self.text = apply_edits(&self.text, &edits);
        &self.text
    }
}

//! The typed request/response contract for oracle calls.
//!
//! Every oracle call names its input and output fields up front through a
//! `Signature`. Adapters render the signature however their model expects;
//! the runtime only ever deals in named text fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::demo::Example;

/// A named field with a description for the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into() }
    }
}

/// The declared shape of one kind of oracle call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Stable name used in logs (e.g. "agent_step", "rating").
    pub name: String,
    /// Task instructions given to the model.
    pub instructions: String,
    pub inputs: Vec<FieldSpec>,
    pub outputs: Vec<FieldSpec>,
}

impl Signature {
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|f| f.name.as_str())
    }
}

/// One oracle invocation: a signature, values for its inputs, and any
/// demonstrations to steer the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub signature: Signature,
    pub inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub demos: Vec<Example>,
}

impl OracleRequest {
    pub fn new(signature: Signature) -> Self {
        Self { signature, inputs: BTreeMap::new(), demos: Vec::new() }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn with_demos(mut self, demos: Vec<Example>) -> Self {
        self.demos = demos;
        self
    }
}

/// Named output fields returned by the oracle. Any field may be missing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OracleOutputs {
    pub fields: BTreeMap<String, String>,
}

impl OracleOutputs {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

//! File-backed inputs and state for the CLI: training examples, saved
//! demonstrations and the persisted memory blob.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::{info, warn};

use keel_contracts::{
    demo::{DemoConfiguration, Example},
    error::{KeelError, KeelResult},
};
use keel_optimize::{load_configuration, BlobStore};

// ── Training examples ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ExampleLine {
    #[serde(alias = "input_xml")]
    input_document: String,
    #[serde(alias = "output_xml")]
    output_document: String,
}

/// Parse JSONL examples. Blank lines are skipped.
pub fn parse_examples(text: &str) -> KeelResult<Vec<Example>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let parsed: ExampleLine = serde_json::from_str(line).map_err(|e| KeelError::ConfigError {
                reason: format!("example on line {}: {e}", i + 1),
            })?;
            Ok(Example::new(parsed.input_document, parsed.output_document))
        })
        .collect()
}

pub fn load_examples(path: &Path) -> KeelResult<Vec<Example>> {
    parse_examples(&read_text(path)?)
}

pub fn read_text(path: &Path) -> KeelResult<String> {
    fs::read_to_string(path).map_err(|e| KeelError::ConfigError {
        reason: format!("cannot read '{}': {e}", path.display()),
    })
}

// ── Demonstrations ────────────────────────────────────────────────────────────

/// The configuration saved under `key`. Nothing saved means the oracle runs
/// without demonstrations.
pub fn load_demos(blobs: &dyn BlobStore, key: &str) -> KeelResult<Option<DemoConfiguration>> {
    let config = load_configuration(blobs, key)?;
    match &config {
        Some(c) => info!(key, demos = c.demos.len(), score = c.score, "demonstrations loaded"),
        None => warn!(key, "no demonstration configuration saved; running without demonstrations"),
    }
    Ok(config)
}

// ── Memory ────────────────────────────────────────────────────────────────────

/// The memory blob, kept between CLI invocations as a plain text file.
pub struct MemoryFile {
    path: PathBuf,
}

impl MemoryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A missing file is empty memory.
    pub fn load(&self) -> KeelResult<String> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(persistence(&self.path, e)),
        }
    }

    pub fn save(&self, text: &str) -> KeelResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| persistence(parent, e))?;
        }
        fs::write(&self.path, text).map_err(|e| persistence(&self.path, e))
    }
}

fn persistence(path: &Path, e: std::io::Error) -> KeelError {
    KeelError::Persistence { reason: format!("memory file '{}': {e}", path.display()) }
}

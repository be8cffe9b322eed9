//! Chained trace records and the exported log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keel_contracts::{
    execution::{RunStatus, TraceEvent, TraceKind},
    operation::DispatchResult,
};

/// One trace event at its position in the hash chain.
///
/// Changing any field, including those of the embedded event, breaks
/// `this_hash` and every later `prev_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Position in the chain, starting at 0.
    pub sequence: u64,
    pub event: TraceEvent,
    /// `this_hash` of the previous record, or `GENESIS_HASH`.
    pub prev_hash: String,
    pub this_hash: String,
}

impl TraceRecord {
    /// The `prev_hash` of the first record in every chain.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// A snapshot of the whole chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceLog {
    pub records: Vec<TraceRecord>,
    /// Runs that reached `Done` or `Aborted`.
    pub finalized_runs: Vec<String>,
    pub exported_at: DateTime<Utc>,
    /// `this_hash` of the last record; empty for an empty log.
    pub terminal_hash: String,
}

impl TraceLog {
    /// Records belonging to `run_id`, in chain order.
    pub fn run<'a>(&'a self, run_id: &'a str) -> impl Iterator<Item = &'a TraceRecord> + 'a {
        self.records.iter().filter(move |r| r.event.run_id == run_id)
    }
}

/// One line describing an event, for terminal output.
pub fn summarize(event: &TraceEvent) -> String {
    let detail = match &event.kind {
        TraceKind::Request { document } => format!("request ({} bytes)", document.len()),
        TraceKind::Response { raw } => format!("response ({} bytes)", raw.len()),
        TraceKind::Validation { valid: true, .. } => "response valid".to_string(),
        TraceKind::Validation { valid: false, message } => format!("response invalid: {message}"),
        TraceKind::Repair { injected, unresolved } => {
            let outcome = if *unresolved { "unresolved" } else { "resolved" };
            if injected.is_empty() {
                format!("repair {outcome}")
            } else {
                format!("repair {outcome}, injected {}", injected.join(", "))
            }
        }
        TraceKind::Dispatch { index, operation, result } => {
            let status = match result {
                DispatchResult::Informational => "shown".to_string(),
                DispatchResult::Denied { reason } => format!("denied ({reason})"),
                DispatchResult::Declined => "declined".to_string(),
                DispatchResult::Executed { outcome } => match &outcome.error {
                    Some(error) => format!("failed ({error})"),
                    None => "ok".to_string(),
                },
            };
            format!("op #{index} {}: {status}", operation.describe())
        }
        TraceKind::Transition { status } => match status {
            RunStatus::Running => "running".to_string(),
            RunStatus::Done => "done".to_string(),
            RunStatus::Aborted { reason } => format!("aborted: {reason}"),
        },
    };
    format!("[{}] {detail}", event.iteration)
}

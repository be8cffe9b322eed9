//! In-memory implementation of `TraceSink`.
//!
//! `InMemoryTraceWriter` keeps every event of every run it sees in one
//! hash chain behind a `Mutex`. Use `export_log()` to take a snapshot and
//! `verify_integrity()` to check the chain has not been altered.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{debug, info};

use keel_contracts::{
    error::{KeelError, KeelResult},
    execution::TraceEvent,
};
use keel_core::traits::TraceSink;

use crate::{
    chain::{hash_event, verify_chain},
    record::{TraceLog, TraceRecord},
};

// ── Internal mutable state ────────────────────────────────────────────────────

pub(crate) struct ChainState {
    pub(crate) records: Vec<TraceRecord>,
    /// `this_hash` of the last record, or `GENESIS_HASH`.
    pub(crate) last_hash: String,
    pub(crate) finalized_runs: Vec<String>,
}

// ── Public writer ─────────────────────────────────────────────────────────────

/// An append-only trace writer backed by a SHA-256 hash chain.
///
/// Events for a run that has already been finalized are rejected with
/// `TraceWriteFailed`.
#[derive(Clone)]
pub struct InMemoryTraceWriter {
    pub(crate) state: Arc<Mutex<ChainState>>,
}

impl Default for InMemoryTraceWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTraceWriter {
    pub fn new() -> Self {
        let state = ChainState {
            records: Vec::new(),
            last_hash: TraceRecord::GENESIS_HASH.to_string(),
            finalized_runs: Vec::new(),
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// Snapshot of the chain. `terminal_hash` is empty when nothing has
    /// been recorded.
    pub fn export_log(&self) -> TraceLog {
        let state = self.snapshot();
        TraceLog {
            records: state.records.clone(),
            finalized_runs: state.finalized_runs.clone(),
            exported_at: Utc::now(),
            terminal_hash: state.records.last().map(|r| r.this_hash.clone()).unwrap_or_default(),
        }
    }

    pub fn verify_integrity(&self) -> bool {
        verify_chain(&self.snapshot().records)
    }

    pub fn len(&self) -> usize {
        self.snapshot().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_finalized(&self, run_id: &str) -> bool {
        self.snapshot().finalized_runs.iter().any(|r| r == run_id)
    }

    // Reads tolerate a poisoned lock.
    fn snapshot(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> KeelResult<MutexGuard<'_, ChainState>> {
        self.state.lock().map_err(|e| KeelError::TraceWriteFailed {
            reason: format!("trace state lock poisoned: {e}"),
        })
    }
}

// ── TraceSink impl ────────────────────────────────────────────────────────────

impl TraceSink for InMemoryTraceWriter {
    fn record(&self, event: &TraceEvent) -> KeelResult<()> {
        let mut state = self.lock()?;

        if state.finalized_runs.iter().any(|r| *r == event.run_id) {
            return Err(KeelError::TraceWriteFailed {
                reason: format!("run {} is already finalized", event.run_id),
            });
        }

        let sequence = state.records.len() as u64;
        let prev_hash = state.last_hash.clone();
        let this_hash = hash_event(sequence, event, &prev_hash)?;

        debug!(run_id = %event.run_id, sequence, iteration = event.iteration, "trace event recorded");

        state.records.push(TraceRecord {
            sequence,
            event: event.clone(),
            prev_hash,
            this_hash: this_hash.clone(),
        });
        state.last_hash = this_hash;

        Ok(())
    }

    fn finalize(&self, run_id: &str) -> KeelResult<()> {
        let mut state = self.lock()?;

        if state.finalized_runs.iter().any(|r| r == run_id) {
            return Err(KeelError::TraceWriteFailed {
                reason: format!("run {run_id} finalized twice"),
            });
        }
        state.finalized_runs.push(run_id.to_string());

        let event_count = state.records.iter().filter(|r| r.event.run_id == run_id).count();
        info!(
            run_id = %run_id,
            event_count,
            terminal_hash = %state.last_hash,
            "trace finalized"
        );

        Ok(())
    }
}

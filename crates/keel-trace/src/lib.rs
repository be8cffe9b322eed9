//! # keel-trace
//!
//! Append-only, SHA-256 hash-chained trace of agent runs.
//!
//! ## Overview
//!
//! Every event the state machine emits is wrapped in a [`TraceRecord`] that
//! links to the previous record by hash. Altering any recorded byte breaks
//! the chain, which [`verify_chain`] detects.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keel_trace::InMemoryTraceWriter;
//!
//! let trace = InMemoryTraceWriter::new();
//! let machine = StateMachine::new(oracle, codec, policy, gate, executor,
//!     Box::new(trace.clone()), config);
//! machine.run(initial)?;
//!
//! assert!(trace.verify_integrity());
//! let log = trace.export_log();
//! ```

pub mod chain;
pub mod record;
pub mod writer;

pub use chain::{hash_event, verify_chain};
pub use record::{summarize, TraceLog, TraceRecord};
pub use writer::InMemoryTraceWriter;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use keel_contracts::{
        error::KeelError,
        execution::{AbortReason, RunStatus, TraceEvent, TraceKind},
        operation::{DispatchResult, Operation, OperationOutcome},
    };
    use keel_core::traits::TraceSink;

    use super::{summarize, verify_chain, InMemoryTraceWriter, TraceRecord};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn event(run_id: &str, iteration: u64, raw: &str) -> TraceEvent {
        TraceEvent {
            run_id: run_id.to_string(),
            iteration,
            kind: TraceKind::Response { raw: raw.to_string() },
            timestamp: Utc::now(),
        }
    }

    // ── 1. integrity ──────────────────────────────────────────────────────────

    #[test]
    fn test_hash_chain_integrity() {
        let trace = InMemoryTraceWriter::new();
        trace.record(&event("run-a", 0, "first")).unwrap();
        trace.record(&event("run-a", 0, "second")).unwrap();
        trace.record(&event("run-a", 1, "third")).unwrap();

        assert!(trace.verify_integrity());
        assert_eq!(trace.len(), 3);
    }

    // ── 2. tampering ──────────────────────────────────────────────────────────

    /// Rewriting a recorded response is detected.
    #[test]
    fn test_tampered_event_detected() {
        let trace = InMemoryTraceWriter::new();
        trace.record(&event("run-t", 0, "<agent_output/>")).unwrap();
        trace.record(&event("run-t", 1, "original")).unwrap();

        {
            let mut state = trace.state.lock().unwrap();
            state.records[1].event.kind = TraceKind::Response { raw: "forged".into() };
        }

        assert!(!trace.verify_integrity());
    }

    #[test]
    fn test_dropped_record_detected() {
        let trace = InMemoryTraceWriter::new();
        for i in 0..3 {
            trace.record(&event("run-d", i, "x")).unwrap();
        }
        let mut records = trace.export_log().records;
        records.remove(1);
        assert!(!verify_chain(&records));
    }

    // ── 3. genesis and sequence ───────────────────────────────────────────────

    #[test]
    fn test_first_record_links_to_genesis() {
        let trace = InMemoryTraceWriter::new();
        trace.record(&event("run-g", 0, "only")).unwrap();

        let log = trace.export_log();
        assert_eq!(log.records[0].prev_hash, TraceRecord::GENESIS_HASH);
        assert_eq!(log.records[0].this_hash.len(), 64);
    }

    /// Events from several runs share one chain with gapless sequences.
    #[test]
    fn test_sequence_spans_runs() {
        let trace = InMemoryTraceWriter::new();
        trace.record(&event("run-1", 0, "a")).unwrap();
        trace.record(&event("run-2", 0, "b")).unwrap();
        trace.record(&event("run-1", 1, "c")).unwrap();

        let log = trace.export_log();
        let sequences: Vec<u64> = log.records.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(log.run("run-1").count(), 2);
        assert_eq!(log.records[1].prev_hash, log.records[0].this_hash);
    }

    // ── 4. export ─────────────────────────────────────────────────────────────

    #[test]
    fn test_export_log_terminal_hash() {
        let trace = InMemoryTraceWriter::new();
        trace.record(&event("run-e", 0, "a")).unwrap();
        trace.record(&event("run-e", 0, "b")).unwrap();
        trace.finalize("run-e").unwrap();

        let log = trace.export_log();
        assert_eq!(log.terminal_hash, log.records[1].this_hash);
        assert_eq!(log.finalized_runs, vec!["run-e".to_string()]);

        let json = serde_json::to_string(&log).unwrap();
        let back: super::TraceLog = serde_json::from_str(&json).unwrap();
        assert!(verify_chain(&back.records));
    }

    #[test]
    fn test_empty_chain() {
        let trace = InMemoryTraceWriter::new();
        assert!(trace.is_empty());
        assert!(trace.verify_integrity());
        assert_eq!(trace.export_log().terminal_hash, "");
    }

    // ── 5. finalization ───────────────────────────────────────────────────────

    #[test]
    fn test_record_after_finalize_rejected() {
        let trace = InMemoryTraceWriter::new();
        trace.record(&event("run-f", 0, "a")).unwrap();
        trace.finalize("run-f").unwrap();
        assert!(trace.is_finalized("run-f"));

        assert!(matches!(
            trace.record(&event("run-f", 1, "late")),
            Err(KeelError::TraceWriteFailed { .. })
        ));
        assert!(matches!(trace.finalize("run-f"), Err(KeelError::TraceWriteFailed { .. })));

        // Other runs keep recording.
        trace.record(&event("run-other", 0, "b")).unwrap();
        assert!(trace.verify_integrity());
    }

    // ── 6. summaries ──────────────────────────────────────────────────────────

    #[test]
    fn test_summarize() {
        let dispatch = TraceEvent {
            run_id: "r".into(),
            iteration: 2,
            kind: TraceKind::Dispatch {
                index: 0,
                operation: Operation::Command { text: "ls".into() },
                result: DispatchResult::Executed { outcome: OperationOutcome::ok("a.txt") },
            },
            timestamp: Utc::now(),
        };
        assert_eq!(summarize(&dispatch), "[2] op #0 run command: ls: ok");

        let aborted = TraceEvent {
            run_id: "r".into(),
            iteration: 0,
            kind: TraceKind::Transition {
                status: RunStatus::Aborted { reason: AbortReason::Cancelled },
            },
            timestamp: Utc::now(),
        };
        assert_eq!(summarize(&aborted), "[0] aborted: cancelled");

        let repair = TraceEvent {
            run_id: "r".into(),
            iteration: 1,
            kind: TraceKind::Repair { injected: vec!["done".into()], unresolved: false },
            timestamp: Utc::now(),
        };
        assert_eq!(summarize(&repair), "[1] repair resolved, injected done");
    }
}

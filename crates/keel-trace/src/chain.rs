//! Hash-chain primitives: hashing and chain integrity verification.
//!
//! Hash input layout (bytes, in order):
//!   1. sequence as 8-byte little-endian
//!   2. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   3. compact JSON of the trace event (which carries the run id)

use sha2::{Digest, Sha256};

use keel_contracts::{
    error::{KeelError, KeelResult},
    execution::TraceEvent,
};

use crate::record::TraceRecord;

/// Compute the SHA-256 hash committing to one trace record.
///
/// Returns a lowercase 64-character hex string.
pub fn hash_event(sequence: u64, event: &TraceEvent, prev_hash: &str) -> KeelResult<String> {
    let event_json = serde_json::to_vec(event).map_err(|e| KeelError::TraceWriteFailed {
        reason: format!("trace event is not serializable: {e}"),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&event_json);

    Ok(hex::encode(hasher.finalize()))
}

/// Verify the integrity of a hash chain.
///
/// Valid when every record links to its predecessor (the first to
/// `GENESIS_HASH`), sequences count up from 0 without gaps, and every
/// stored hash matches the recomputed one. An empty chain is valid.
pub fn verify_chain(records: &[TraceRecord]) -> bool {
    let mut expected_prev = TraceRecord::GENESIS_HASH.to_string();

    for (position, record) in records.iter().enumerate() {
        if record.sequence != position as u64 || record.prev_hash != expected_prev {
            return false;
        }
        match hash_event(record.sequence, &record.event, &record.prev_hash) {
            Ok(hash) if hash == record.this_hash => {}
            _ => return false,
        }
        expected_prev = record.this_hash.clone();
    }

    true
}

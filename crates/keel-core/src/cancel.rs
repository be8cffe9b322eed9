//! Cooperative cancellation for agent runs.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A shared flag the caller sets to stop a run.
///
/// The state machine checks it between iterations and again when an oracle
/// call returns; a call in flight is never interrupted, but its result is
/// discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

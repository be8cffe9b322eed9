use keel_contracts::{error::KeelResult, execution::TraceEvent};
use keel_core::traits::TraceSink;
use keel_trace::{summarize, InMemoryTraceWriter};

/// Records into the hash chain, then echoes a one-line summary to stderr.
pub struct ConsoleTrace {
    chain: InMemoryTraceWriter,
}

impl ConsoleTrace {
    pub fn new(chain: InMemoryTraceWriter) -> Self {
        Self { chain }
    }
}

impl TraceSink for ConsoleTrace {
    fn record(&self, event: &TraceEvent) -> KeelResult<()> {
        self.chain.record(event)?;
        eprintln!("{}", summarize(event));
        Ok(())
    }

    fn finalize(&self, run_id: &str) -> KeelResult<()> {
        self.chain.finalize(run_id)
    }
}

//! Collaborator traits for the keel runtime.
//!
//! These define every boundary the state machine crosses:
//!
//! - `Oracle`           : the language model (untrusted, nondeterministic)
//! - `Codec`            : state ⇄ document translation and repair
//! - `OperationPolicy`  : first gate for side-effecting operations
//! - `ConfirmationGate` : the operator's per-call yes/no
//! - `OperationExecutor`: runs confirmed operations
//! - `TraceSink`        : records every stage of every iteration
//!
//! The state machine wires them together. `OperationExecutor::run` is never
//! called for an operation the policy denied or the operator declined.

use keel_contracts::{
    agent::AgentState,
    document::{RepairedDocument, RequestDocument, ResponseDocument, ValidationReport},
    error::{DocumentError, KeelResult},
    execution::TraceEvent,
    operation::{Operation, OperationOutcome, OperationVerdict},
    oracle::{OracleOutputs, OracleRequest},
};

/// The external language model.
///
/// Implementations may block on network or process I/O. Any failure must be
/// reported as `KeelError::RemoteFailure`; the runtime does not retry.
pub trait Oracle: Send + Sync {
    fn invoke(&self, request: &OracleRequest) -> KeelResult<OracleOutputs>;
}

/// Translation between agent state and the wire format.
pub trait Codec: Send + Sync {
    /// Render `state` as a request document. Deterministic.
    fn encode(&self, state: &AgentState) -> RequestDocument;

    /// Parse and schema-check raw oracle output.
    fn decode(&self, raw: &str) -> Result<ResponseDocument, DocumentError>;

    /// One best-effort pass that fills in missing required fields.
    ///
    /// Only structural gaps are repaired; malformed text is returned
    /// unresolved untouched.
    fn repair(&self, raw: &str) -> RepairedDocument;

    /// Structural check with no side effects.
    fn validate(&self, raw: &str) -> ValidationReport {
        match self.decode(raw) {
            Ok(_) => ValidationReport { valid: true, message: "ok".to_string() },
            Err(e) => ValidationReport { valid: false, message: e.to_string() },
        }
    }
}

/// Decides whether a side-effecting operation may even be offered to the
/// operator.
pub trait OperationPolicy: Send + Sync {
    fn evaluate(&self, operation: &Operation) -> KeelResult<OperationVerdict>;
}

/// Asks for explicit approval before each side-effecting operation.
///
/// May block on a human.
pub trait ConfirmationGate: Send + Sync {
    fn confirm(&self, description: &str) -> bool;
}

/// Performs confirmed operations.
///
/// Failures are returned inside the outcome, never as errors: the oracle is
/// expected to read them in the next observation.
pub trait OperationExecutor: Send + Sync {
    fn run(&self, operation: &Operation) -> OperationOutcome;
}

/// The per-iteration trace.
///
/// A failed write is fatal for the iteration in progress.
pub trait TraceSink: Send + Sync {
    fn record(&self, event: &TraceEvent) -> KeelResult<()>;

    /// Called once when a run reaches `Done` or `Aborted`.
    fn finalize(&self, run_id: &str) -> KeelResult<()>;
}

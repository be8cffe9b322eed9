//! The keel state machine: the observe → plan → act loop.
//!
//! Each iteration runs the same pipeline:
//!
//!   Encode → Oracle → Decode → [Repair] → Dispatch → Transition
//!
//! A run is `Running` until the oracle sets `done` (→ `Done`) or an
//! iteration cannot be completed (→ `Aborted`). Iterations are strictly
//! sequential: request N+1 is built from response N. Nothing from a failed
//! iteration is applied to the state.

use chrono::Utc;
use tracing::{debug, info, warn};

use keel_contracts::{
    agent::{AgentState, LastPlan, RunId},
    config::AgentConfig,
    demo::DemoConfiguration,
    document::ResponseDocument,
    error::{DocumentError, KeelError, KeelResult},
    execution::{AbortReason, RunReport, RunStatus, StepResult, TraceEvent, TraceKind},
    operation::{DispatchResult, Operation, OperationVerdict},
    oracle::{FieldSpec, OracleRequest, Signature},
};

use crate::{
    cancel::CancelToken,
    traits::{Codec, ConfirmationGate, OperationExecutor, OperationPolicy, Oracle, TraceSink},
};

/// Name of the single input field of the agent step signature.
pub const INPUT_FIELD: &str = "input_document";
/// Name of the single output field of the agent step signature.
pub const OUTPUT_FIELD: &str = "output_document";

/// Observation used when an iteration dispatched nothing with a result.
const NO_OPERATIONS: &str = "No operations were executed.";

/// The oracle contract for one agent iteration.
pub fn agent_signature(config: &AgentConfig) -> Signature {
    Signature {
        name: "agent_step".to_string(),
        instructions: config.instructions.clone(),
        inputs: vec![FieldSpec::new(
            INPUT_FIELD,
            "agent_state document with memory, last_plan, last_action and observation",
        )],
        outputs: vec![FieldSpec::new(
            OUTPUT_FIELD,
            "agent_output document with updated_memory, new_plan, execution_instructions, \
             expected_outcome and done",
        )],
    }
}

/// Drives one agent run.
///
/// Construct one machine per run. It owns every collaborator and enforces
/// the pipeline ordering on each call to `step()`.
pub struct StateMachine {
    oracle: Box<dyn Oracle>,
    codec: Box<dyn Codec>,
    executor: Box<dyn OperationExecutor>,
    gate: Box<dyn ConfirmationGate>,
    policy: Box<dyn OperationPolicy>,
    trace: Box<dyn TraceSink>,
    config: AgentConfig,
    demos: Option<DemoConfiguration>,
    cancel: CancelToken,
    run_id: RunId,
}

impl StateMachine {
    pub fn new(
        oracle: Box<dyn Oracle>,
        codec: Box<dyn Codec>,
        executor: Box<dyn OperationExecutor>,
        gate: Box<dyn ConfirmationGate>,
        policy: Box<dyn OperationPolicy>,
        trace: Box<dyn TraceSink>,
        config: AgentConfig,
    ) -> Self {
        Self {
            oracle,
            codec,
            executor,
            gate,
            policy,
            trace,
            config,
            demos: None,
            cancel: CancelToken::new(),
            run_id: RunId::new(),
        }
    }

    /// Attach demonstrations to every oracle request. `None` runs with zero
    /// demonstrations.
    pub fn with_demos(mut self, demos: Option<DemoConfiguration>) -> Self {
        self.demos = demos;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// The state a new run of this machine starts from.
    pub fn initial_state(&self, task: impl Into<String>) -> AgentState {
        AgentState::initial(task, self.config.initial_plan.clone())
    }

    /// Execute one iteration.
    ///
    /// # Pipeline
    ///
    /// 1. Encode `state` into a request document
    /// 2. Call the oracle (with demonstrations, if any):
    ///    - failure → `Aborted(RemoteFailure)`
    ///    - cancelled while in flight → result discarded, `Aborted(Cancelled)`
    /// 3. Decode the response:
    ///    - malformed → `Aborted(ParseFailure)`, repair is not attempted
    ///    - schema error → repair once; still unresolved → `Aborted(ParseFailure)`
    /// 4. Dispatch operations in document order, folding each result or
    ///    refusal into the next observation
    /// 5. Build the next state from the response
    /// 6. `done` → `Done`, otherwise `Continued`
    ///
    /// # Errors
    ///
    /// Only trace write failures and policy errors are returned as `Err`.
    /// Oracle and parse failures are `StepResult::Aborted`.
    pub fn step(&self, state: AgentState, iteration: u64) -> KeelResult<StepResult> {
        if state.done {
            return Err(KeelError::StateMachineError {
                reason: "step() called on a state that is already done".to_string(),
            });
        }

        debug!(
            run_id = %self.run_id,
            iteration,
            memory_len = state.memory.len(),
            observation_len = state.observation.len(),
            "iteration starting"
        );

        // ── Step 1: Encode ───────────────────────────────────────────────────
        let request_doc = self.codec.encode(&state);
        self.emit(iteration, TraceKind::Request { document: request_doc.0.clone() })?;

        // ── Step 2: Oracle call ──────────────────────────────────────────────
        let demos = self
            .demos
            .as_ref()
            .map(|d| d.demos.clone())
            .unwrap_or_default();
        let request = OracleRequest::new(agent_signature(&self.config))
            .with_input(INPUT_FIELD, request_doc.0)
            .with_demos(demos);

        let outputs = match self.oracle.invoke(&request) {
            Ok(outputs) => outputs,
            Err(e) => {
                let reason = AbortReason::RemoteFailure { message: remote_message(e) };
                return self.abort(iteration, reason, state);
            }
        };

        if self.cancel.is_cancelled() {
            info!(run_id = %self.run_id, iteration, "run cancelled during oracle call, discarding result");
            return self.abort(iteration, AbortReason::Cancelled, state);
        }

        let raw = outputs.get(OUTPUT_FIELD).unwrap_or_default().to_string();
        self.emit(iteration, TraceKind::Response { raw: raw.clone() })?;

        // ── Step 3: Decode, repairing structural gaps once ───────────────────
        let response = match self.codec.decode(&raw) {
            Ok(doc) => {
                self.emit(
                    iteration,
                    TraceKind::Validation { valid: true, message: "ok".to_string() },
                )?;
                doc
            }
            Err(err) => {
                self.emit(
                    iteration,
                    TraceKind::Validation { valid: false, message: err.to_string() },
                )?;
                match self.recover(iteration, &raw, err)? {
                    Ok(doc) => doc,
                    Err(reason) => return self.abort(iteration, reason, state),
                }
            }
        };

        // ── Step 4: Dispatch operations in document order ────────────────────
        let mut observations = Vec::new();
        for (index, operation) in response.execution_instructions.iter().enumerate() {
            let result = self.dispatch(operation)?;
            if let Some(text) = fold_observation(operation, &result) {
                observations.push(text);
            }
            self.emit(
                iteration,
                TraceKind::Dispatch { index, operation: operation.clone(), result },
            )?;
        }
        let observation = if observations.is_empty() {
            NO_OPERATIONS.to_string()
        } else {
            observations.join("\n\n")
        };

        // ── Step 5: Transition ───────────────────────────────────────────────
        let next_state = AgentState {
            memory: response.updated_memory.clone(),
            last_plan: LastPlan::Structured(response.new_plan.clone()),
            last_action: self.config.last_action_marker.clone(),
            observation,
            done: response.done,
        };

        // ── Step 6: Terminal check ───────────────────────────────────────────
        if next_state.done {
            info!(run_id = %self.run_id, iteration, "oracle declared the task done");
            self.emit(iteration, TraceKind::Transition { status: RunStatus::Done })?;
            self.trace.finalize(&self.run_id.to_string())?;
            Ok(StepResult::Done { final_state: next_state, response })
        } else {
            self.emit(iteration, TraceKind::Transition { status: RunStatus::Running })?;
            Ok(StepResult::Continued { next_state, response })
        }
    }

    /// Run until the oracle is done or the run aborts.
    pub fn run(&self, initial: AgentState) -> KeelResult<RunReport> {
        self.run_while(initial, |_, _| true)
    }

    /// Run while `keep_going(iteration, &state)` returns true.
    ///
    /// Stopping through `keep_going` leaves the run `Running`; this is how
    /// callers layer iteration caps on top of the machine. Cancellation is
    /// checked before every iteration.
    pub fn run_while<F>(&self, initial: AgentState, mut keep_going: F) -> KeelResult<RunReport>
    where
        F: FnMut(u64, &AgentState) -> bool,
    {
        let mut state = initial;
        let mut iteration = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                info!(run_id = %self.run_id, iteration, "run cancelled between iterations");
                let reason = AbortReason::Cancelled;
                self.halt(iteration, &reason)?;
                return Ok(self.report(state, RunStatus::Aborted { reason }, iteration));
            }
            if !keep_going(iteration, &state) {
                debug!(run_id = %self.run_id, iteration, "caller stopped the run");
                return Ok(self.report(state, RunStatus::Running, iteration));
            }

            match self.step(state, iteration)? {
                StepResult::Continued { next_state, .. } => {
                    state = next_state;
                    iteration += 1;
                }
                StepResult::Done { final_state, .. } => {
                    return Ok(self.report(final_state, RunStatus::Done, iteration + 1));
                }
                StepResult::Aborted { reason, state } => {
                    return Ok(self.report(state, RunStatus::Aborted { reason }, iteration + 1));
                }
            }
        }
    }

    // ── Internal helpers ──────────────────────────────────────────────────────

    /// Handle a decode failure: malformed documents abort immediately,
    /// schema errors get exactly one repair pass.
    fn recover(
        &self,
        iteration: u64,
        raw: &str,
        err: DocumentError,
    ) -> KeelResult<Result<ResponseDocument, AbortReason>> {
        if err.is_malformed() {
            warn!(run_id = %self.run_id, iteration, error = %err, "oracle output is not well-formed");
            return Ok(Err(AbortReason::ParseFailure {
                stage: "decode".to_string(),
                field: None,
                message: err.to_string(),
                raw: raw.to_string(),
            }));
        }

        let repaired = self.codec.repair(raw);
        self.emit(
            iteration,
            TraceKind::Repair {
                injected: repaired.injected.clone(),
                unresolved: repaired.unresolved,
            },
        )?;

        match repaired.document {
            Some(doc) if !repaired.unresolved => {
                warn!(
                    run_id = %self.run_id,
                    iteration,
                    injected = ?repaired.injected,
                    "oracle output repaired with default fields"
                );
                Ok(Ok(doc))
            }
            _ => {
                let remaining = repaired.error.unwrap_or(err);
                warn!(run_id = %self.run_id, iteration, error = %remaining, "repair left the document invalid");
                Ok(Err(AbortReason::ParseFailure {
                    stage: "repair".to_string(),
                    field: remaining.field().map(str::to_string),
                    message: remaining.to_string(),
                    raw: raw.to_string(),
                }))
            }
        }
    }

    /// Route one operation through policy, confirmation, and the executor.
    fn dispatch(&self, operation: &Operation) -> KeelResult<DispatchResult> {
        if !operation.has_side_effects() {
            info!(run_id = %self.run_id, message = %operation.target(), "agent message");
            return Ok(DispatchResult::Informational);
        }

        match self.policy.evaluate(operation)? {
            OperationVerdict::Deny { reason } => {
                warn!(
                    run_id = %self.run_id,
                    kind = operation.kind(),
                    target = %operation.target(),
                    reason = %reason,
                    "policy refused operation"
                );
                Ok(DispatchResult::Denied { reason })
            }
            OperationVerdict::Confirm => {
                if !self.gate.confirm(&operation.describe()) {
                    info!(
                        run_id = %self.run_id,
                        kind = operation.kind(),
                        target = %operation.target(),
                        "operator declined operation"
                    );
                    return Ok(DispatchResult::Declined);
                }
                debug!(run_id = %self.run_id, kind = operation.kind(), "running operation");
                let outcome = self.executor.run(operation);
                if let Some(error) = &outcome.error {
                    warn!(run_id = %self.run_id, kind = operation.kind(), error = %error, "operation failed");
                }
                Ok(DispatchResult::Executed { outcome })
            }
        }
    }

    fn abort(&self, iteration: u64, reason: AbortReason, state: AgentState) -> KeelResult<StepResult> {
        self.halt(iteration, &reason)?;
        Ok(StepResult::Aborted { reason, state })
    }

    /// Trace the transition to `Aborted` and seal the trace.
    fn halt(&self, iteration: u64, reason: &AbortReason) -> KeelResult<()> {
        warn!(run_id = %self.run_id, iteration, reason = %reason, "run aborted");
        self.emit(
            iteration,
            TraceKind::Transition { status: RunStatus::Aborted { reason: reason.clone() } },
        )?;
        self.trace.finalize(&self.run_id.to_string())
    }

    fn emit(&self, iteration: u64, kind: TraceKind) -> KeelResult<()> {
        self.trace.record(&TraceEvent {
            run_id: self.run_id.to_string(),
            iteration,
            kind,
            timestamp: Utc::now(),
        })
    }

    fn report(&self, final_state: AgentState, status: RunStatus, iterations: u64) -> RunReport {
        RunReport {
            run_id: self.run_id.clone(),
            final_state,
            status,
            iterations,
        }
    }
}

fn remote_message(err: KeelError) -> String {
    match err {
        KeelError::RemoteFailure { reason } => reason,
        other => other.to_string(),
    }
}

/// The text one dispatched operation contributes to the next observation.
/// Messages contribute nothing.
fn fold_observation(operation: &Operation, result: &DispatchResult) -> Option<String> {
    let header = format!("[{}] {}", operation.kind(), operation.target());
    let body = match result {
        DispatchResult::Informational => return None,
        DispatchResult::Denied { reason } => format!("refused: {reason}"),
        DispatchResult::Declined => "refused: operator declined".to_string(),
        DispatchResult::Executed { outcome } => {
            let mut body = if outcome.output.trim().is_empty() {
                "(no output)".to_string()
            } else {
                outcome.output.trim_end().to_string()
            };
            if let Some(error) = &outcome.error {
                body.push_str(&format!("\nerror: {error}"));
            }
            body
        }
    };
    Some(format!("{header}\n{body}"))
}

// ── Tests ────────────────────────────────────────────────────────────────────

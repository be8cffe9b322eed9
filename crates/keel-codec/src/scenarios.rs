//! End-to-end runs of the state machine over the markup codec.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use keel_contracts::{
    config::AgentConfig,
    error::{KeelError, KeelResult},
    execution::{AbortReason, RunStatus, TraceEvent, TraceKind},
    operation::{Operation, OperationOutcome, OperationVerdict},
    oracle::{OracleOutputs, OracleRequest},
};
use keel_core::{
    traits::{ConfirmationGate, OperationExecutor, OperationPolicy, Oracle, TraceSink},
    StateMachine, INPUT_FIELD, OUTPUT_FIELD,
};

use crate::XmlCodec;

struct Script {
    replies: Mutex<VecDeque<String>>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl Oracle for Script {
    fn invoke(&self, request: &OracleRequest) -> KeelResult<OracleOutputs> {
        let input = request.inputs.get(INPUT_FIELD).cloned().unwrap_or_default();
        self.seen.lock().unwrap().push(input);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| KeelError::RemoteFailure { reason: "no more replies".into() })?;
        Ok(OracleOutputs::default().with_field(OUTPUT_FIELD, reply))
    }
}

struct EchoShell {
    ran: Arc<Mutex<Vec<Operation>>>,
}

impl OperationExecutor for EchoShell {
    fn run(&self, operation: &Operation) -> OperationOutcome {
        self.ran.lock().unwrap().push(operation.clone());
        OperationOutcome::ok("total 0\ndrwxr-xr-x  .\n")
    }
}

struct Approve;

impl ConfirmationGate for Approve {
    fn confirm(&self, _description: &str) -> bool {
        true
    }
}

struct AllowAll;

impl OperationPolicy for AllowAll {
    fn evaluate(&self, _operation: &Operation) -> KeelResult<OperationVerdict> {
        Ok(OperationVerdict::Confirm)
    }
}

#[derive(Clone, Default)]
struct Events(Arc<Mutex<Vec<TraceEvent>>>);

impl TraceSink for Events {
    fn record(&self, event: &TraceEvent) -> KeelResult<()> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn finalize(&self, _run_id: &str) -> KeelResult<()> {
        Ok(())
    }
}

struct Harness {
    machine: StateMachine,
    seen: Arc<Mutex<Vec<String>>>,
    ran: Arc<Mutex<Vec<Operation>>>,
    events: Events,
}

fn harness(replies: &[&str]) -> Harness {
    let seen = Arc::new(Mutex::new(vec![]));
    let ran = Arc::new(Mutex::new(vec![]));
    let events = Events::default();
    let machine = StateMachine::new(
        Box::new(Script {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            seen: seen.clone(),
        }),
        Box::new(XmlCodec::new()),
        Box::new(EchoShell { ran: ran.clone() }),
        Box::new(Approve),
        Box::new(AllowAll),
        Box::new(events.clone()),
        AgentConfig::default(),
    );
    Harness { machine, seen, ran, events }
}

const LIST_FILES: &str = r#"<agent_output>
  <updated_memory>Asked to list files.</updated_memory>
  <new_plan><plan><goal>List files</goal><steps><step id="1"><action>Run ls -la</action></step></steps><current_step_id>1</current_step_id></plan></new_plan>
  <execution_instructions><write_operations><operation type="command">ls -la</operation></write_operations></execution_instructions>
  <expected_outcome>A listing</expected_outcome>
  <done>false</done>
</agent_output>"#;

const FINISHED: &str = r#"<agent_output>
  <updated_memory>Files listed.</updated_memory>
  <new_plan><plan><goal>List files</goal><steps><step id="1"><action>Report</action></step></steps></plan></new_plan>
  <execution_instructions></execution_instructions>
  <done>true</done>
</agent_output>"#;

#[test]
fn command_output_becomes_the_next_observation() {
    let h = harness(&[LIST_FILES, FINISHED]);
    let report = h.machine.run(h.machine.initial_state("List the files")).unwrap();

    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.iterations, 2);
    assert_eq!(*h.ran.lock().unwrap(), vec![Operation::Command { text: "ls -la".into() }]);

    let seen = h.seen.lock().unwrap();
    assert!(seen[0].contains("<observation>List the files</observation>"));
    assert!(seen[0].contains("<last_plan><plan></plan></last_plan>"));
    assert!(seen[1].contains("[command] ls -la"));
    assert!(seen[1].contains("drwxr-xr-x"));
    assert!(seen[1].contains("<memory>Asked to list files.</memory>"));
    assert!(seen[1].contains("<goal>List files</goal>"));
    assert!(seen[1].contains("<last_action>executed_instructions</last_action>"));
}

#[test]
fn done_on_first_response_finishes_in_one_iteration() {
    let h = harness(&[FINISHED]);
    let report = h.machine.run(h.machine.initial_state("nothing to do")).unwrap();

    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.iterations, 1);
    assert!(report.final_state.done);
    assert_eq!(report.final_state.memory, "Files listed.");
}

#[test]
fn unescaped_ampersand_aborts_without_repair() {
    let bad = LIST_FILES.replace("Asked to list files.", "Tom & Jerry");
    let h = harness(&[&bad]);
    let report = h.machine.run(h.machine.initial_state("task")).unwrap();

    match report.status {
        RunStatus::Aborted { reason: AbortReason::ParseFailure { stage, .. } } => assert_eq!(stage, "decode"),
        other => panic!("expected a parse failure, got {other:?}"),
    }
    assert_eq!(report.final_state.observation, "task");
    assert!(h.ran.lock().unwrap().is_empty());
    let repairs = h
        .events
        .0
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e.kind, TraceKind::Repair { .. }))
        .count();
    assert_eq!(repairs, 0);
}

#[test]
fn missing_done_is_repaired_and_the_run_continues() {
    let gappy = LIST_FILES.replace("<done>false</done>", "");
    let h = harness(&[&gappy, FINISHED]);
    let report = h.machine.run(h.machine.initial_state("task")).unwrap();

    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.iterations, 2);
    let events = h.events.0.lock().unwrap();
    let injected: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.kind {
            TraceKind::Repair { injected, unresolved: false } => Some(injected.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(injected, vec![vec!["done".to_string()]]);
}

//! Rendering of request and response documents.

use keel_contracts::agent::{AgentState, LastPlan};
use keel_contracts::document::{RequestDocument, ResponseDocument};
use keel_contracts::operation::Operation;
use keel_contracts::plan::{Plan, PlanStep};

use crate::schema::{DONE, EXECUTION_INSTRUCTIONS, EXPECTED_OUTCOME, NEW_PLAN, ROOT, UPDATED_MEMORY};
use crate::xml::{escape, is_markup, Element};

/// Encode the state snapshot the oracle sees each iteration.
///
/// Every text field is escaped. The one exception is a raw `last_plan` that
/// is already well-formed markup, which is embedded as-is so the initial
/// `<plan></plan>` reads as a plan rather than as text.
pub fn encode_request(state: &AgentState) -> RequestDocument {
    let plan = match &state.last_plan {
        LastPlan::Structured(plan) => plan_element(plan).to_markup(),
        LastPlan::Raw(text) if is_markup(text) => text.trim().to_string(),
        LastPlan::Raw(text) => escape(text),
    };

    let mut out = String::from("<agent_state>\n");
    out.push_str(&format!("  <memory>{}</memory>\n", escape(&state.memory)));
    out.push_str(&format!("  <last_plan>{plan}</last_plan>\n"));
    out.push_str(&format!("  <last_action>{}</last_action>\n", escape(&state.last_action)));
    out.push_str(&format!("  <observation>{}</observation>\n", escape(&state.observation)));
    out.push_str("</agent_state>");
    RequestDocument(out)
}

/// Render a response in the canonical wire form. Decoding the result yields
/// the same document back.
pub fn render_response(doc: &ResponseDocument) -> String {
    let mut root = Element::new(ROOT)
        .with_child(Element::new(UPDATED_MEMORY).with_text(doc.updated_memory.clone()))
        .with_child(Element::new(NEW_PLAN).with_child(plan_element(&doc.new_plan)))
        .with_child(operations_element(&doc.execution_instructions));
    if let Some(outcome) = &doc.expected_outcome {
        root = root.with_child(Element::new(EXPECTED_OUTCOME).with_text(outcome.clone()));
    }
    root = root.with_child(Element::new(DONE).with_text(doc.done.to_string()));
    root.to_markup()
}

pub fn render_plan(plan: &Plan) -> String {
    plan_element(plan).to_markup()
}

pub(crate) fn plan_element(plan: &Plan) -> Element {
    let steps = plan
        .steps
        .iter()
        .fold(Element::new("steps"), |steps, step| steps.with_child(step_element(step)));

    let mut el = Element::new("plan")
        .with_child(Element::new("goal").with_text(plan.goal.clone()))
        .with_child(steps);
    if let Some(id) = plan.current_step_id {
        el = el.with_child(Element::new("current_step_id").with_text(id.to_string()));
    }
    el
}

fn step_element(step: &PlanStep) -> Element {
    let mut el = Element::new("step")
        .with_attribute("id", step.id.to_string())
        .with_child(Element::new("action").with_text(step.action.clone()));
    if let Some(reason) = &step.reason {
        el = el.with_child(Element::new("reason").with_text(reason.clone()));
    }
    el
}

pub(crate) fn operations_element(ops: &[Operation]) -> Element {
    let inner = ops.iter().fold(Element::new("write_operations"), |list, op| {
        let el = match op {
            Operation::Command { text } => Element::new("operation")
                .with_attribute("type", "command")
                .with_text(text.clone()),
            Operation::WriteFile { path, content } => Element::new("operation")
                .with_attribute("type", "file")
                .with_attribute("path", path.clone())
                .with_text(content.clone()),
            Operation::Message { text } => Element::new("operation")
                .with_attribute("type", "message")
                .with_text(text.clone()),
        };
        list.with_child(el)
    });
    Element::new(EXECUTION_INSTRUCTIONS).with_child(inner)
}

/// A filled-in response used to show the oracle the expected shape.
pub fn output_format_example() -> String {
    let doc = ResponseDocument {
        updated_memory: "What you know so far, rewritten in full.".to_string(),
        new_plan: Plan {
            goal: "The overall goal".to_string(),
            steps: vec![
                PlanStep {
                    id: 1,
                    action: "Inspect the working directory".to_string(),
                    reason: Some("Find the relevant files".to_string()),
                },
                PlanStep { id: 2, action: "Write the summary".to_string(), reason: None },
            ],
            current_step_id: Some(1),
        },
        execution_instructions: vec![
            Operation::Command { text: "ls -la".to_string() },
            Operation::WriteFile { path: "notes.txt".to_string(), content: "file body".to_string() },
        ],
        expected_outcome: Some("A directory listing".to_string()),
        done: false,
    };
    render_response(&doc)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use keel_contracts::agent::{AgentState, LastPlan};
    use keel_contracts::plan::{Plan, PlanStep};

    use super::{encode_request, output_format_example};
    use crate::{decode, xml::parse_fragment};

    #[test]
    fn request_escapes_text_fields() {
        let mut state = AgentState::initial("compare a < b && c > d", "<plan></plan>");
        state.memory = "x & y".to_string();
        let doc = encode_request(&state);
        let text = doc.as_str();

        assert!(text.contains("<observation>compare a &lt; b &amp;&amp; c &gt; d</observation>"));
        assert!(text.contains("<memory>x &amp; y</memory>"));
        assert!(text.contains("<last_plan><plan></plan></last_plan>"));
        assert!(parse_fragment(text).is_ok());
    }

    #[test]
    fn raw_plan_text_is_escaped_when_not_markup() {
        let state = AgentState::initial("task", "first <ls>, then & read");
        let doc = encode_request(&state);
        assert!(doc.as_str().contains("<last_plan>first &lt;ls&gt;, then &amp; read</last_plan>"));
        assert!(parse_fragment(doc.as_str()).is_ok());
    }

    #[test]
    fn structured_plan_is_rendered_as_markup() {
        let mut state = AgentState::initial("task", "");
        state.last_plan = LastPlan::Structured(Plan {
            goal: "g".into(),
            steps: vec![PlanStep { id: 1, action: "a & b".into(), reason: None }],
            current_step_id: Some(1),
        });
        let text = encode_request(&state).0;
        assert!(text.contains(
            r#"<last_plan><plan><goal>g</goal><steps><step id="1"><action>a &amp; b</action></step></steps><current_step_id>1</current_step_id></plan></last_plan>"#
        ));
    }

    #[test]
    fn format_example_is_itself_valid() {
        let doc = decode(&output_format_example()).unwrap();
        assert_eq!(doc.execution_instructions.len(), 2);
        assert_eq!(doc.new_plan.current_step_id, Some(1));
    }
}

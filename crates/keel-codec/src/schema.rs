//! Extraction of a [`ResponseDocument`] from parsed markup.
//!
//! Fields are checked in wire order; the first violation is reported with
//! the field's path so the repair pass and the operator both know where to
//! look. Text values are kept exactly as written; whitespace only decides
//! whether a field counts as blank.

use std::collections::HashSet;

use keel_contracts::document::ResponseDocument;
use keel_contracts::error::DocumentError;
use keel_contracts::operation::Operation;
use keel_contracts::plan::{Plan, PlanStep};

use crate::xml::{Element, Node};

pub const ROOT: &str = "agent_output";
pub const UPDATED_MEMORY: &str = "updated_memory";
pub const NEW_PLAN: &str = "new_plan";
pub const EXECUTION_INSTRUCTIONS: &str = "execution_instructions";
pub const EXPECTED_OUTCOME: &str = "expected_outcome";
pub const DONE: &str = "done";
/// Older producers name the completion flag this way.
pub const DONE_LEGACY: &str = "is_done";

/// The response fields as a flat list of elements.
///
/// When exactly one top-level element is `<agent_output>` it is unwrapped
/// and its siblings are ignored; otherwise the top-level elements are the
/// fields.
pub fn fields(nodes: &[Node]) -> Vec<&Element> {
    let top: Vec<&Element> = top_level(nodes).collect();
    match single_root(&top) {
        Some(root) => root.elements().collect(),
        None => top,
    }
}

/// Top-level elements that sit beside an unwrapped `<agent_output>`.
pub fn siblings(nodes: &[Node]) -> Vec<&Element> {
    let top: Vec<&Element> = top_level(nodes).collect();
    match single_root(&top) {
        Some(_) => top.into_iter().filter(|e| e.name != ROOT).collect(),
        None => Vec::new(),
    }
}

fn top_level(nodes: &[Node]) -> impl Iterator<Item = &Element> {
    nodes.iter().filter_map(|n| match n {
        Node::Element(e) => Some(e),
        Node::Text(_) => None,
    })
}

fn single_root<'a>(top: &[&'a Element]) -> Option<&'a Element> {
    let mut roots = top.iter().copied().filter(|e| e.name == ROOT);
    match (roots.next(), roots.next()) {
        (Some(root), None) => Some(root),
        _ => None,
    }
}

pub fn field<'a>(fields: &[&'a Element], name: &str) -> Option<&'a Element> {
    fields.iter().copied().find(|e| e.name == name)
}

pub fn done_field<'a>(fields: &[&'a Element]) -> Option<&'a Element> {
    field(fields, DONE).or_else(|| field(fields, DONE_LEGACY))
}

/// Build a response document, or name the first field that is wrong.
pub fn extract(nodes: &[Node]) -> Result<ResponseDocument, DocumentError> {
    let fields = fields(nodes);

    let updated_memory = field(&fields, UPDATED_MEMORY).ok_or_else(|| missing(UPDATED_MEMORY))?.text();

    let plan_el = field(&fields, NEW_PLAN).ok_or_else(|| missing(NEW_PLAN))?;
    let new_plan = plan(plan_el)?;

    let ops_el = field(&fields, EXECUTION_INSTRUCTIONS).ok_or_else(|| missing(EXECUTION_INSTRUCTIONS))?;
    let execution_instructions = operations(ops_el)?;

    let expected_outcome = field(&fields, EXPECTED_OUTCOME).map(Element::text);

    let done_el = done_field(&fields).ok_or_else(|| missing(DONE))?;
    let done = flag(done_el)?;

    Ok(ResponseDocument {
        updated_memory,
        new_plan,
        execution_instructions,
        expected_outcome,
        done,
    })
}

fn missing(field: &str) -> DocumentError {
    DocumentError::schema(field, "required field is missing")
}

// ── Plan ──────────────────────────────────────────────────────────────────────

fn plan(new_plan: &Element) -> Result<Plan, DocumentError> {
    if new_plan.is_blank() {
        return Err(DocumentError::schema(NEW_PLAN, "plan is empty"));
    }
    // The <plan> wrapper is customary but not required.
    let el = new_plan.child("plan").unwrap_or(new_plan);

    let goal = el
        .child("goal")
        .ok_or_else(|| DocumentError::schema("new_plan.goal", "required field is missing"))?
        .text();

    let steps_el = el
        .child("steps")
        .ok_or_else(|| DocumentError::schema("new_plan.steps", "required field is missing"))?;

    let mut seen = HashSet::new();
    let mut steps = Vec::new();
    for step_el in steps_el.children_named("step") {
        let step = plan_step(step_el)?;
        if !seen.insert(step.id) {
            return Err(DocumentError::schema(
                "new_plan.steps",
                format!("duplicate step id {}", step.id),
            ));
        }
        steps.push(step);
    }

    let current_step_id = match el.child("current_step_id") {
        None => None,
        Some(c) if c.text().trim().is_empty() => None,
        Some(c) => {
            let id = step_id(c.text().trim(), "new_plan.current_step_id")?;
            if !seen.contains(&id) {
                return Err(DocumentError::schema(
                    "new_plan.current_step_id",
                    format!("references unknown step {id}"),
                ));
            }
            Some(id)
        }
    };

    Ok(Plan { goal, steps, current_step_id })
}

fn plan_step(el: &Element) -> Result<PlanStep, DocumentError> {
    let raw_id = match el.attribute("id") {
        Some(id) => id.to_string(),
        None => el
            .child("id")
            .map(|c| c.text())
            .ok_or_else(|| DocumentError::schema("new_plan.steps.step.id", "required field is missing"))?,
    };
    let id = step_id(raw_id.trim(), "new_plan.steps.step.id")?;

    let action = el
        .child("action")
        .map(Element::text)
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| DocumentError::schema("new_plan.steps.step.action", format!("step {id} has no action")))?;

    let reason = el
        .child("reason")
        .map(Element::text)
        .filter(|r| !r.trim().is_empty());

    Ok(PlanStep { id, action, reason })
}

fn step_id(raw: &str, field: &str) -> Result<u32, DocumentError> {
    match raw.parse::<u32>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(DocumentError::schema(
            field,
            format!("expected a positive integer, got '{raw}'"),
        )),
    }
}

// ── Operations ────────────────────────────────────────────────────────────────

fn operations(el: &Element) -> Result<Vec<Operation>, DocumentError> {
    let container = el.child("write_operations").unwrap_or(el);

    if container.child("operation").is_none() && !container.direct_text().trim().is_empty() {
        return Err(DocumentError::schema(
            EXECUTION_INSTRUCTIONS,
            "expected <operation> elements, found bare text",
        ));
    }

    container.children_named("operation").map(operation).collect()
}

fn operation(el: &Element) -> Result<Operation, DocumentError> {
    let kind = el
        .attribute("type")
        .ok_or_else(|| DocumentError::schema(EXECUTION_INSTRUCTIONS, "operation has no type attribute"))?
        .trim()
        .to_ascii_lowercase();

    match kind.as_str() {
        "command" => {
            let text = el.text();
            if text.trim().is_empty() {
                return Err(DocumentError::schema(
                    EXECUTION_INSTRUCTIONS,
                    "command operation has no command text",
                ));
            }
            Ok(Operation::Command { text })
        }
        "file" => {
            let path = el
                .attribute("path")
                .map(str::to_string)
                .or_else(|| el.child("path").map(|p| p.text()))
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| DocumentError::schema(EXECUTION_INSTRUCTIONS, "file operation has no path"))?;
            let content = match el.child("content") {
                Some(c) => c.text(),
                None => el.direct_text(),
            };
            Ok(Operation::WriteFile { path, content })
        }
        "message" => Ok(Operation::Message { text: el.text() }),
        other => Err(DocumentError::schema(
            EXECUTION_INSTRUCTIONS,
            format!("unknown operation type '{other}'"),
        )),
    }
}

// ── Flags ─────────────────────────────────────────────────────────────────────

fn flag(el: &Element) -> Result<bool, DocumentError> {
    let raw = el.text();
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        "" => Err(DocumentError::schema(DONE, "flag is empty")),
        other => Err(DocumentError::schema(
            DONE,
            format!("expected true or false, got '{other}'"),
        )),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use keel_contracts::error::DocumentError;
    use keel_contracts::operation::Operation;

    use super::{extract, fields, siblings};
    use crate::xml::parse_fragment;

    const PLAN: &str = r#"<new_plan><plan><goal>List files</goal><steps><step id="1"><action>Run ls</action><reason>see</reason></step></steps><current_step_id>1</current_step_id></plan></new_plan>"#;

    fn doc(body: &str) -> String {
        format!("<agent_output>{body}</agent_output>")
    }

    fn schema_field(input: &str) -> String {
        let nodes = parse_fragment(input).unwrap();
        match extract(&nodes) {
            Err(DocumentError::Schema { field, .. }) => field,
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn extracts_full_document() {
        let input = doc(&format!(
            "<updated_memory> notes </updated_memory>{PLAN}\
             <execution_instructions><write_operations>\
             <operation type=\"command\">ls -la</operation>\
             <operation type=\"file\" path=\"out.txt\">line\n</operation>\
             <operation type=\"message\">hello</operation>\
             </write_operations></execution_instructions>\
             <expected_outcome>a listing</expected_outcome><done>False</done>"
        ));
        let nodes = parse_fragment(&input).unwrap();
        let doc = extract(&nodes).unwrap();

        assert_eq!(doc.updated_memory, " notes ");
        assert_eq!(doc.new_plan.goal, "List files");
        assert_eq!(doc.new_plan.current_step().unwrap().reason.as_deref(), Some("see"));
        assert_eq!(
            doc.execution_instructions,
            vec![
                Operation::Command { text: "ls -la".into() },
                Operation::WriteFile { path: "out.txt".into(), content: "line\n".into() },
                Operation::Message { text: "hello".into() },
            ]
        );
        assert_eq!(doc.expected_outcome.as_deref(), Some("a listing"));
        assert!(!doc.done);
    }

    #[test]
    fn root_is_optional_and_legacy_done_is_accepted() {
        let input = format!(
            "<updated_memory/>{PLAN}<execution_instructions/><is_done>true</is_done>"
        );
        let nodes = parse_fragment(&input).unwrap();
        let doc = extract(&nodes).unwrap();
        assert!(doc.done);
        assert!(doc.execution_instructions.is_empty());
        assert_eq!(doc.expected_outcome, None);
    }

    #[test]
    fn file_path_and_content_as_children() {
        let input = doc(&format!(
            "<updated_memory/>{PLAN}<execution_instructions>\
             <operation type=\"file\"><path>a.txt</path><content>  body  </content></operation>\
             </execution_instructions><done>false</done>"
        ));
        let nodes = parse_fragment(&input).unwrap();
        let doc = extract(&nodes).unwrap();
        assert_eq!(
            doc.execution_instructions,
            vec![Operation::WriteFile { path: "a.txt".into(), content: "  body  ".into() }]
        );
    }

    #[test]
    fn root_beside_other_elements_is_unwrapped() {
        let input = format!(
            "<agent_output><updated_memory>Important facts</updated_memory>{PLAN}\
             <execution_instructions><operation type=\"command\">ls</operation></execution_instructions>\
             <done>false</done></agent_output>\n<note>extra</note>"
        );
        let nodes = parse_fragment(&input).unwrap();
        let doc = extract(&nodes).unwrap();
        assert_eq!(doc.updated_memory, "Important facts");
        assert_eq!(doc.execution_instructions, vec![Operation::Command { text: "ls".into() }]);

        let names: Vec<_> = siblings(&nodes).iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, ["note"]);
    }

    #[test]
    fn two_roots_are_not_unwrapped() {
        let one = doc(&format!("<updated_memory/>{PLAN}<execution_instructions/><done>true</done>"));
        let nodes = parse_fragment(&format!("{one}{one}")).unwrap();
        assert_eq!(fields(&nodes).len(), 2);
        assert!(siblings(&nodes).is_empty());
        assert_eq!(schema_field(&format!("{one}{one}")), "updated_memory");
    }

    #[test]
    fn surrounding_whitespace_is_kept() {
        let input = doc(
            "<updated_memory>line one\n</updated_memory>\
             <new_plan><plan><goal> g</goal><steps><step id=\" 1 \"><action>a </action><reason>\tr</reason></step></steps>\
             <current_step_id> 1 </current_step_id></plan></new_plan>\
             <execution_instructions><operation type=\"command\">echo hi </operation>\
             <operation type=\"message\"> note</operation></execution_instructions>\
             <expected_outcome> out </expected_outcome><done> true </done>",
        );
        let nodes = parse_fragment(&input).unwrap();
        let doc = extract(&nodes).unwrap();

        assert_eq!(doc.updated_memory, "line one\n");
        assert_eq!(doc.new_plan.goal, " g");
        let step = doc.new_plan.current_step().unwrap();
        assert_eq!((step.id, step.action.as_str(), step.reason.as_deref()), (1, "a ", Some("\tr")));
        assert_eq!(
            doc.execution_instructions,
            vec![Operation::Command { text: "echo hi ".into() }, Operation::Message { text: " note".into() }]
        );
        assert_eq!(doc.expected_outcome.as_deref(), Some(" out "));
        assert!(doc.done);
    }

    #[test]
    fn blank_command_is_still_rejected() {
        let input = doc(&format!(
            "<updated_memory/>{PLAN}<execution_instructions><operation type=\"command\">  \n</operation></execution_instructions><done>true</done>"
        ));
        assert_eq!(schema_field(&input), "execution_instructions");
    }

    #[test]
    fn first_missing_field_is_named() {
        assert_eq!(schema_field(&doc("<done>true</done>")), "updated_memory");
        assert_eq!(schema_field(&doc("<updated_memory/><done>true</done>")), "new_plan");
        assert_eq!(
            schema_field(&doc(&format!("<updated_memory/>{PLAN}<done>true</done>"))),
            "execution_instructions"
        );
        assert_eq!(
            schema_field(&doc(&format!("<updated_memory/>{PLAN}<execution_instructions/>"))),
            "done"
        );
    }

    #[test]
    fn bad_values_are_schema_errors() {
        let base = |plan: &str, ops: &str, done: &str| {
            doc(&format!(
                "<updated_memory/>{plan}<execution_instructions>{ops}</execution_instructions><done>{done}</done>"
            ))
        };
        assert_eq!(schema_field(&base(PLAN, "", "maybe")), "done");
        assert_eq!(
            schema_field(&base(PLAN, "<operation type=\"dance\">x</operation>", "true")),
            "execution_instructions"
        );
        assert_eq!(schema_field(&base(PLAN, "just run ls", "true")), "execution_instructions");
        assert_eq!(
            schema_field(&base(
                "<new_plan><plan><goal>g</goal><steps><step id=\"0\"><action>a</action></step></steps></plan></new_plan>",
                "",
                "true"
            )),
            "new_plan.steps.step.id"
        );
        assert_eq!(
            schema_field(&base(
                "<new_plan><plan><goal>g</goal><steps><step id=\"1\"><action>a</action></step><step id=\"1\"><action>b</action></step></steps></plan></new_plan>",
                "",
                "true"
            )),
            "new_plan.steps"
        );
        assert_eq!(
            schema_field(&base(
                "<new_plan><plan><goal>g</goal><steps/><current_step_id>3</current_step_id></plan></new_plan>",
                "",
                "true"
            )),
            "new_plan.current_step_id"
        );
        assert_eq!(schema_field(&base("<new_plan/>", "", "true")), "new_plan");
    }
}

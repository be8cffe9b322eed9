//! Oracle adapter that shells out to an external model program.
//!
//! The prompt goes to the program's stdin; the completion is read from its
//! stdout. Fields are delimited on both sides by `[[ ## name ## ]]` header
//! lines.

use std::{
    collections::BTreeMap,
    io::{self, Write},
    process::{Command, Stdio},
    thread,
};

use tracing::debug;

use keel_contracts::{
    config::OracleConfig,
    error::{KeelError, KeelResult},
    oracle::{OracleOutputs, OracleRequest, Signature},
};
use keel_core::traits::Oracle;
use keel_rating::{PIPELINE_INPUT, PIPELINE_OUTPUT};

const COMPLETED: &str = "completed";

pub struct CommandOracle {
    config: OracleConfig,
}

impl CommandOracle {
    pub fn new(config: OracleConfig) -> Self {
        Self { config }
    }

    fn call(&self, prompt: &str) -> KeelResult<String> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        if let Some(model) = &self.config.model {
            cmd.args(["-m", model]);
        }

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| remote(format!("failed to start '{}': {e}", self.config.command)))?;

        // Stdin is fed from its own thread while stdout and stderr drain.
        let stdin = child.stdin.take();
        let (written, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(prompt.as_bytes()),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            (writer.join(), output)
        });

        let output =
            output.map_err(|e| remote(format!("failed to wait for '{}': {e}", self.config.command)))?;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!(command = %self.config.command, "oracle command stopped reading the prompt early");
            }
            Ok(Err(e)) => return Err(remote(format!("failed to write prompt: {e}"))),
            Err(_) => return Err(remote("prompt writer thread panicked".to_string())),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(remote(format!(
                "'{}' exited with {}: {}",
                self.config.command,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Oracle for CommandOracle {
    fn invoke(&self, request: &OracleRequest) -> KeelResult<OracleOutputs> {
        let prompt = render_prompt(request);
        debug!(signature = %request.signature.name, bytes = prompt.len(), "calling oracle command");

        let completion = self.call(&prompt)?;
        Ok(parse_completion(request, &completion))
    }
}

fn remote(reason: String) -> KeelError {
    KeelError::RemoteFailure { reason }
}

fn header(name: &str) -> String {
    format!("[[ ## {name} ## ]]")
}

/// Render the full prompt: instructions, field list, demonstrations, the
/// current inputs, and the expected answer layout.
pub fn render_prompt(request: &OracleRequest) -> String {
    let signature = &request.signature;
    let mut prompt = String::new();

    prompt.push_str(&signature.instructions);
    prompt.push_str("\n\nInput fields:\n");
    for field in &signature.inputs {
        prompt.push_str(&format!("- {}: {}\n", field.name, field.description));
    }
    prompt.push_str("\nOutput fields:\n");
    for field in &signature.outputs {
        prompt.push_str(&format!("- {}: {}\n", field.name, field.description));
    }

    if let Some((input, output)) = demo_fields(signature) {
        for (i, demo) in request.demos.iter().enumerate() {
            prompt.push_str(&format!("\nExample {}:\n", i + 1));
            prompt.push_str(&format!("{}\n{}\n", header(input), demo.input_document));
            prompt.push_str(&format!("{}\n{}\n", header(output), demo.output_document));
        }
    }

    prompt.push('\n');
    for field in &signature.inputs {
        let value = request.inputs.get(&field.name).map(String::as_str).unwrap_or_default();
        prompt.push_str(&format!("{}\n{}\n\n", header(&field.name), value));
    }

    let order: Vec<String> = signature.output_names().map(header).collect();
    prompt.push_str(&format!(
        "Respond with the fields {}, each on its own header line, then end with {}.\n",
        order.join(", "),
        header(COMPLETED)
    ));
    prompt
}

/// The two fields a demonstration's (input document, output document) pair
/// is shown under, or `None` when the signature has no place for them.
///
/// A one-in, one-out signature shows the pair as its input and answer. The
/// rating signature takes both documents as inputs; a demo carries no
/// ratings, so no answer is shown.
fn demo_fields(signature: &Signature) -> Option<(&str, &str)> {
    let inputs: Vec<&str> = signature.inputs.iter().map(|f| f.name.as_str()).collect();
    match (inputs.as_slice(), signature.outputs.as_slice()) {
        ([input], [output]) => Some((*input, output.name.as_str())),
        ([PIPELINE_INPUT, PIPELINE_OUTPUT], _) => Some((PIPELINE_INPUT, PIPELINE_OUTPUT)),
        _ => None,
    }
}

/// Split a completion into `[[ ## name ## ]]` sections. Section bodies are
/// trimmed; unknown names are ignored.
///
/// A completion with no headers at all is taken as the value of the only
/// output field when the signature declares exactly one.
pub fn parse_completion(request: &OracleRequest, completion: &str) -> OracleOutputs {
    let sections = split_sections(completion);
    let mut outputs = OracleOutputs::default();

    if sections.is_empty() {
        let mut names = request.signature.output_names();
        if let (Some(only), None) = (names.next(), names.next()) {
            return outputs.with_field(only, completion.trim());
        }
        return outputs;
    }

    for name in request.signature.output_names() {
        if let Some(value) = sections.get(name) {
            outputs = outputs.with_field(name, value.clone());
        }
    }
    outputs
}

fn split_sections(text: &str) -> BTreeMap<String, String> {
    let mut sections = BTreeMap::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some(name) = parse_header(line) {
            if let Some((done, body)) = current.take() {
                sections.insert(done, body.join("\n").trim().to_string());
            }
            if name != COMPLETED {
                current = Some((name.to_string(), Vec::new()));
            }
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((name, body)) = current {
        sections.insert(name, body.join("\n").trim().to_string());
    }
    sections
}

fn parse_header(line: &str) -> Option<&str> {
    let name = line.trim().strip_prefix("[[ ## ")?.strip_suffix(" ## ]]")?.trim();
    (!name.is_empty()).then_some(name)
}

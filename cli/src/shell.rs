//! Local executor and confirmation gates.

use std::{
    fs,
    io::{self, BufRead, Write},
    path::PathBuf,
    process::Command,
};

use tracing::{debug, info};

use keel_contracts::operation::{Operation, OperationOutcome};
use keel_core::traits::{ConfirmationGate, OperationExecutor};

// ── Executor ──────────────────────────────────────────────────────────────────

/// Runs commands through `sh -c` and writes files relative to `workdir`.
pub struct ShellExecutor {
    workdir: PathBuf,
}

impl ShellExecutor {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self { workdir: workdir.into() }
    }

    fn run_command(&self, text: &str) -> OperationOutcome {
        let output = match Command::new("sh").arg("-c").arg(text).current_dir(&self.workdir).output() {
            Ok(output) => output,
            Err(e) => return OperationOutcome::failed("", format!("failed to start shell: {e}")),
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        let combined = combined.trim_end().to_string();

        if output.status.success() {
            OperationOutcome::ok(combined)
        } else {
            OperationOutcome::failed(combined, format!("command exited with {}", output.status))
        }
    }

    fn write_file(&self, path: &str, content: &str) -> OperationOutcome {
        let target = self.workdir.join(path);
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                return OperationOutcome::failed("", format!("cannot create {}: {e}", parent.display()));
            }
        }
        match fs::write(&target, content) {
            Ok(()) => OperationOutcome::ok(format!("wrote {} bytes to {path}", content.len())),
            Err(e) => OperationOutcome::failed("", format!("cannot write {}: {e}", target.display())),
        }
    }
}

impl OperationExecutor for ShellExecutor {
    fn run(&self, operation: &Operation) -> OperationOutcome {
        match operation {
            Operation::Command { text } => {
                debug!(command = %text, "running shell command");
                self.run_command(text)
            }
            Operation::WriteFile { path, content } => self.write_file(path, content),
            Operation::Message { text } => OperationOutcome::ok(text.clone()),
        }
    }
}

// ── Gates ─────────────────────────────────────────────────────────────────────

/// Asks on the terminal before every side-effecting operation.
pub struct TerminalGate;

impl ConfirmationGate for TerminalGate {
    fn confirm(&self, description: &str) -> bool {
        eprint!("{description}\nProceed? [y/N] ");
        if io::stderr().flush().is_err() {
            return false;
        }
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(_) => is_yes(&line),
            Err(_) => false,
        }
    }
}

/// Approves everything. Used for `--yes`.
pub struct AutoApprove;

impl ConfirmationGate for AutoApprove {
    fn confirm(&self, description: &str) -> bool {
        info!(operation = %description, "auto-approved");
        true
    }
}

/// Only an explicit yes approves; anything else, including EOF, declines.
pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

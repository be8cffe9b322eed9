//! keel: command-line driver for the keel agent runtime.
//!
//! Every model call goes through the program named in the `[oracle]` table
//! of the settings file (default `keel.toml`).
//!
//! Usage:
//!   keel run "summarize the README" --max-iterations 5
//!   keel optimize train.jsonl --strategy random_search --key default
//!   keel rate input.xml output.xml --detailed
//!   keel memory show | add <text> | clear
//!   keel validate response.xml --repair

mod console;
mod files;
mod oracle;
mod shell;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use keel_codec::XmlCodec;
use keel_contracts::{
    demo::{DemoConfiguration, StrategyKind},
    error::{KeelError, KeelResult},
    execution::RunStatus,
};
use keel_core::{
    traits::{Codec, ConfirmationGate},
    StateMachine,
};
use keel_memory::{apply_edits, MemoryStore};
use keel_optimize::{save_configuration, FileBlobStore, OracleScorer, Optimizer};
use keel_policy::KeelSettings;
use keel_rating::RatingFunction;
use keel_trace::InMemoryTraceWriter;

use crate::{
    console::ConsoleTrace,
    files::{load_demos, load_examples, read_text, MemoryFile},
    oracle::CommandOracle,
    shell::{AutoApprove, ShellExecutor, TerminalGate},
};

// ── CLI definition ────────────────────────────────────────────────────────────

/// Run an oracle-driven agent loop, rate outputs, and optimize the
/// demonstrations the agent is shown.
#[derive(Parser)]
#[command(name = "keel", about = "Structured-output agent runtime")]
struct Cli {
    /// Settings file. Missing means defaults.
    #[arg(long, global = true, default_value = "keel.toml")]
    config: PathBuf,

    /// Directory holding demonstration configurations and memory.
    #[arg(long, global = true, default_value = ".keel")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent on a task until it reports done.
    Run {
        task: String,
        /// Stop after this many iterations even if not done.
        #[arg(long)]
        max_iterations: Option<u64>,
        /// Approve every operation the policy lets through without asking.
        #[arg(long)]
        yes: bool,
        /// Attach the demonstration configuration saved under this key.
        #[arg(long, default_value = "default")]
        demos: String,
        /// Write the hash-chained trace to this file as JSON.
        #[arg(long)]
        trace_out: Option<PathBuf>,
    },
    /// Search for the best demonstrations in a JSONL training set.
    Optimize {
        dataset: PathBuf,
        #[arg(long)]
        strategy: Option<StrategyKind>,
        /// Key to save the winning configuration under.
        #[arg(long, default_value = "default")]
        key: String,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Rate an output document against its input document.
    Rate {
        input: PathBuf,
        output: PathBuf,
        /// Print every criterion with its reasoning.
        #[arg(long)]
        detailed: bool,
        #[arg(long, default_value = "default")]
        demos: String,
    },
    /// Inspect or change the persisted memory.
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
    /// Check a response document against the output schema.
    Validate {
        file: PathBuf,
        /// Try one repair pass if the document is invalid.
        #[arg(long)]
        repair: bool,
    },
}

#[derive(Subcommand)]
enum MemoryAction {
    Show,
    /// Fold new information into memory through the oracle.
    Add { content: String },
    Clear,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // RUST_LOG=debug for per-stage output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = KeelSettings::load_or_default(&cli.config).and_then(|settings| {
        let ctx = Context { settings, store: cli.store };
        match cli.command {
            Command::Run { task, max_iterations, yes, demos, trace_out } => {
                ctx.run(&task, max_iterations, yes, &demos, trace_out.as_deref())
            }
            Command::Optimize { dataset, strategy, key, seed } => {
                ctx.optimize(&dataset, strategy, &key, seed)
            }
            Command::Rate { input, output, detailed, demos } => {
                ctx.rate(&input, &output, detailed, &demos)
            }
            Command::Memory { action } => ctx.memory(action),
            Command::Validate { file, repair } => ctx.validate(&file, repair),
        }
    });

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("keel: {e}");
            std::process::exit(2);
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Each command returns `Ok(false)` when it ran but the outcome is a
/// failure (aborted run, invalid document).
struct Context {
    settings: KeelSettings,
    store: PathBuf,
}

impl Context {
    fn oracle(&self) -> Box<CommandOracle> {
        Box::new(CommandOracle::new(self.settings.oracle.clone()))
    }

    fn memory_file(&self) -> MemoryFile {
        MemoryFile::new(self.store.join("memory.txt"))
    }

    fn demos(&self, key: &str) -> KeelResult<Option<DemoConfiguration>> {
        load_demos(&FileBlobStore::new(self.store.join("demos")), key)
    }

    fn run(
        &self,
        task: &str,
        max_iterations: Option<u64>,
        yes: bool,
        demos: &str,
        trace_out: Option<&Path>,
    ) -> KeelResult<bool> {
        let gate: Box<dyn ConfirmationGate> = if yes { Box::new(AutoApprove) } else { Box::new(TerminalGate) };
        let workdir = std::env::current_dir().map_err(|e| KeelError::ConfigError {
            reason: format!("cannot resolve working directory: {e}"),
        })?;
        let chain = InMemoryTraceWriter::new();

        let machine = StateMachine::new(
            self.oracle(),
            Box::new(XmlCodec::new()),
            Box::new(ShellExecutor::new(workdir)),
            gate,
            Box::new(self.settings.policy()),
            Box::new(ConsoleTrace::new(chain.clone())),
            self.settings.agent.clone(),
        )
        .with_demos(self.demos(demos)?);

        let memory = self.memory_file();
        let mut initial = machine.initial_state(task);
        initial.memory = memory.load()?;

        let report = machine.run_while(initial, |iteration, _| {
            max_iterations.map_or(true, |max| iteration < max)
        })?;

        memory.save(&report.final_state.memory)?;
        if let Some(path) = trace_out {
            let json = serde_json::to_string_pretty(&chain.export_log()).map_err(|e| {
                KeelError::TraceWriteFailed { reason: format!("cannot serialize trace: {e}") }
            })?;
            std::fs::write(path, json).map_err(|e| KeelError::TraceWriteFailed {
                reason: format!("cannot write '{}': {e}", path.display()),
            })?;
        }

        println!();
        println!("run {}: {} iteration(s)", report.run_id, report.iterations);
        println!("trace: {} events, chain intact: {}", chain.len(), chain.verify_integrity());
        println!("memory:\n{}", report.final_state.memory);

        match report.status {
            RunStatus::Done => {
                println!("status: done");
                Ok(true)
            }
            RunStatus::Running => {
                println!("status: stopped after {} iteration(s), not done", report.iterations);
                Ok(true)
            }
            RunStatus::Aborted { reason } => {
                println!("status: aborted ({reason})");
                Ok(false)
            }
        }
    }

    fn optimize(
        &self,
        dataset: &Path,
        strategy: Option<StrategyKind>,
        key: &str,
        seed: Option<u64>,
    ) -> KeelResult<bool> {
        let examples = load_examples(dataset)?;
        let mut config = self.settings.optimizer.clone();
        if let Some(seed) = seed {
            config.seed = seed;
        }
        let strategy = strategy.unwrap_or(config.strategy);

        let rating = RatingFunction::new(self.oracle(), self.settings.rating.clone());
        let scorer = OracleScorer::new(
            self.oracle(),
            Box::new(XmlCodec::new()),
            rating,
            self.settings.agent.clone(),
        );
        let optimizer = Optimizer::new(Box::new(scorer), config).with_progress(|p| {
            eprintln!(
                "candidate {} round {}: score {:.3} (best {:.3})",
                p.candidate, p.round, p.score, p.best_score
            );
        });

        println!("optimizing over {} examples with {strategy}", examples.len());
        let report = optimizer.optimize_with(&examples, strategy)?;

        let blobs = FileBlobStore::new(self.store.join("demos"));
        let location = save_configuration(&blobs, key, &report.configuration)?;

        println!(
            "best score {:.3} with {} demonstration(s) after {} round(s)",
            report.best_score,
            report.configuration.demos.len(),
            report.configuration.rounds
        );
        println!("saved to {location}");
        Ok(true)
    }

    fn rate(&self, input: &Path, output: &Path, detailed: bool, demos: &str) -> KeelResult<bool> {
        let input = read_text(input)?;
        let output = read_text(output)?;
        let rating = RatingFunction::new(self.oracle(), self.settings.rating.clone()).with_demos(self.demos(demos)?);

        if !detailed {
            println!("{:.2}/9", rating.score(&input, &output));
            return Ok(true);
        }

        let result = rating.detailed_score(&input, &output);
        if let Some(error) = &result.error {
            println!("rating failed: {error}");
        }
        for (name, criterion) in &result.criteria {
            println!("{name}: {}/9\n  {}", criterion.score, criterion.reasoning);
        }
        println!("mean: {:.2}/9", result.mean());
        Ok(result.error.is_none())
    }

    fn memory(&self, action: MemoryAction) -> KeelResult<bool> {
        let file = self.memory_file();
        match action {
            MemoryAction::Show => {
                let text = file.load()?;
                if text.is_empty() {
                    println!("memory is empty");
                } else {
                    println!("{text}");
                }
            }
            MemoryAction::Add { content } => {
                let store = MemoryStore::new(self.oracle()).with_text(file.load()?);
                let edits = store.propose_edits(&content);
                let updated = apply_edits(store.show(), &edits);
                for edit in &edits {
                    println!("search {:?} -> replace {:?}", edit.search, edit.replace);
                }
                file.save(&updated)?;
                println!("memory:\n{updated}");
            }
            MemoryAction::Clear => {
                file.save("")?;
                println!("memory cleared");
            }
        }
        Ok(true)
    }

    fn validate(&self, file: &Path, repair: bool) -> KeelResult<bool> {
        let raw = read_text(file)?;
        let codec = XmlCodec::new();

        let report = codec.validate(&raw);
        if report.valid {
            println!("valid");
            return Ok(true);
        }
        println!("invalid: {}", report.message);
        if !repair {
            return Ok(false);
        }

        let repaired = codec.repair(&raw);
        if !repaired.injected.is_empty() {
            println!("injected defaults for: {}", repaired.injected.join(", "));
        }
        if repaired.unresolved {
            let reason = repaired.error.map(|e| e.to_string()).unwrap_or_default();
            println!("repair unresolved: {reason}");
            return Ok(false);
        }
        println!("repaired:\n{}", repaired.text);
        Ok(true)
    }
}

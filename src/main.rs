//! ai-agent
//!
//! Answers one prompt by letting the model inspect, edit and run files under
//! a single working directory.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use time::OffsetDateTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ai_agent::config::Settings;
use ai_agent::llm::LlmClient;
use ai_agent::transcript::{RunRecord, TranscriptStore};
use ai_agent::workflows::{Orchestrator, RunError, RunReport};

/// Sandboxed coding agent backed by an OpenAI-compatible model endpoint
#[derive(Parser, Debug)]
#[command(name = "ai-agent")]
#[command(about = "Answer a prompt using file and script tools confined to one directory")]
struct Args {
    /// The user prompt
    prompt: String,

    /// Print the prompt and token usage, and log at debug level
    #[arg(long)]
    verbose: bool,

    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Working directory the tools are confined to
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Maximum number of model turns
    #[arg(long)]
    max_turns: Option<usize>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// Record the run in this SQLite file
    #[arg(long)]
    transcript: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let directives = log_directives(args.verbose, std::env::var(EnvFilter::DEFAULT_ENV).ok());
    let filter = EnvFilter::try_new(&directives)
        .unwrap_or_else(|_| EnvFilter::new(log_directives(args.verbose, None)));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

/// `RUST_LOG` wins when set; otherwise this crate logs at info (debug with
/// `--verbose`) and everything else at warn.
fn log_directives(verbose: bool, rust_log: Option<String>) -> String {
    rust_log
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| {
            let level = if verbose { "debug" } else { "info" };
            format!("warn,ai_agent={level}")
        })
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let mut settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    if let Some(workdir) = args.workdir {
        settings.working_directory = workdir;
    }
    if let Some(max_turns) = args.max_turns {
        settings.max_turns = max_turns;
    }
    if let Some(model) = args.model {
        settings.llm.model = model;
    }

    let agent_config = settings.agent_config()?;
    let api_key = settings.api_key()?;
    let client = LlmClient::new(settings.llm.clone(), api_key).context("building model client")?;
    let orchestrator = Orchestrator::from_config(client, agent_config);

    tracing::info!(
        model = %settings.llm.model,
        workdir = %settings.working_directory.display(),
        max_turns = orchestrator.max_turns(),
        "starting run"
    );

    let started_at = OffsetDateTime::now_utc();
    let report = orchestrator.run(&args.prompt).await;

    if let Some(path) = &args.transcript {
        record_transcript(path, &args.prompt, &settings.llm.model, started_at, &report);
    }

    if args.verbose {
        println!("User prompt: {}", args.prompt);
        println!("Prompt tokens: {}", report.usage.prompt_tokens);
        println!("Response tokens: {}", report.usage.completion_tokens);
    }

    let code = match report.into_result() {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(status = e.code(), "run failed");
            eprintln!("Error: {e}");
            match e {
                RunError::BudgetExceeded { .. } => ExitCode::from(2),
                RunError::MalformedResponse(_) => ExitCode::from(3),
                RunError::Service(_) => ExitCode::from(1),
            }
        }
    };
    Ok(code)
}

// A failed write never changes the run's outcome.
fn record_transcript(
    path: &std::path::Path,
    prompt: &str,
    model: &str,
    started_at: OffsetDateTime,
    report: &RunReport,
) {
    let result = TranscriptStore::open(path).and_then(|mut store| {
        store.record_run(&RunRecord {
            prompt,
            model,
            started_at,
            report,
        })
    });
    match result {
        Ok(run_id) => tracing::info!(%run_id, path = %path.display(), "transcript recorded"),
        Err(e) => tracing::error!(error = %e, path = %path.display(), "failed to record transcript"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_level_shows_tool_calls() {
        assert_eq!(log_directives(false, None), "warn,ai_agent=info");
        assert_eq!(log_directives(true, None), "warn,ai_agent=debug");
        assert_eq!(log_directives(false, Some("  ".into())), "warn,ai_agent=info");
    }

    #[test]
    fn test_rust_log_overrides_defaults() {
        assert_eq!(log_directives(false, Some("debug".into())), "debug");
        assert_eq!(log_directives(true, Some("trace".into())), "trace");
        assert!(EnvFilter::try_new(log_directives(false, Some("debug".into()))).is_ok());
    }

    #[test]
    fn test_cli_parses_overrides() {
        let args = Args::parse_from([
            "ai-agent",
            "fix the bug",
            "--verbose",
            "--workdir",
            "calculator",
            "--max-turns",
            "5",
        ]);
        assert_eq!(args.prompt, "fix the bug");
        assert!(args.verbose);
        assert_eq!(args.workdir, Some(PathBuf::from("calculator")));
        assert_eq!(args.max_turns, Some(5));
        assert!(args.transcript.is_none());
    }
}

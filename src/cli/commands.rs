//! CLI command definitions for demo-forge.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::api;
use crate::jobs::{Job, LogLevel};
use crate::metrics;
use crate::pipeline::{replay_from_file, ForgeConfig, StageKind, StageVariantRegistry};
use crate::service::{build_deps, ForgeService};

/// Demo analytics environment forge.
#[derive(Parser, Debug)]
#[command(name = "demo-forge")]
#[command(about = "Provision demo analytics environments from a prospect's website")]
#[command(version)]
#[command(
    long_about = "demo-forge researches a company website, designs a demo data model, generates synthetic data, loads it into a warehouse and writes a demo runbook.\n\nExample usage:\n  demo-forge run https://acme.example --offline\n  demo-forge serve --bind 127.0.0.1:8080"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP API.
    Serve(ServeArgs),

    /// Run one job in the foreground and print its progress.
    Run(RunArgs),

    /// Re-run a single stage against an exported snapshot.
    Replay(ReplayArgs),

    /// List pipeline stages and their selected variants.
    Stages(PipelineArgs),
}

/// Flags shared by every command that builds a pipeline.
#[derive(Parser, Debug, Clone, Default)]
pub struct PipelineArgs {
    /// Run every LLM-backed stage with its offline variant.
    #[arg(long)]
    pub offline: bool,

    /// OpenRouter API key.
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Root directory of the local warehouse.
    #[arg(long)]
    pub warehouse_dir: Option<PathBuf>,

    /// Write a state snapshot after every completed stage into this directory.
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,

    /// Model for stages using the standard variant.
    #[arg(long)]
    pub model: Option<String>,

    /// Model for stages using the reasoning variant.
    #[arg(long)]
    pub reasoning_model: Option<String>,

    /// Timeout in seconds for one page fetch.
    #[arg(long)]
    pub fetch_timeout_secs: Option<u64>,

    /// Timeout in seconds for one LLM call.
    #[arg(long)]
    pub llm_timeout_secs: Option<u64>,

    /// Seconds a finished job stays queryable before eviction.
    #[arg(long)]
    pub job_ttl_secs: Option<u64>,
}

impl PipelineArgs {
    /// Environment configuration with these flags applied on top.
    fn config(&self) -> anyhow::Result<ForgeConfig> {
        let mut config = ForgeConfig::from_env().context("invalid configuration")?;
        if self.offline {
            config = config.with_offline(true);
        }
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            config = config.with_api_key(key.clone());
        }
        if let Some(dir) = &self.warehouse_dir {
            config = config.with_warehouse_dir(dir.clone());
        }
        if let Some(dir) = &self.snapshot_dir {
            config = config.with_snapshot_dir(dir.clone());
        }
        if let Some(model) = &self.model {
            config = config.with_default_model(model.clone());
        }
        if let Some(model) = &self.reasoning_model {
            config = config.with_reasoning_model(model.clone());
        }
        if let Some(secs) = self.fetch_timeout_secs {
            config = config.with_fetch_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.llm_timeout_secs {
            config = config.with_llm_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.job_ttl_secs {
            config = config.with_job_ttl(Duration::from_secs(secs));
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind, e.g. 127.0.0.1:8080.
    #[arg(short, long)]
    pub bind: Option<String>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Prospect website (http or https URL).
    pub source: String,

    /// Print the terminal job as JSON instead of progress lines.
    #[arg(short = 'j', long)]
    pub json: bool,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Parser, Debug)]
pub struct ReplayArgs {
    /// Name of the stage to run, e.g. schema_design.
    #[arg(short, long)]
    pub stage: String,

    /// Snapshot file written by a previous run.
    #[arg(long)]
    pub snapshot: PathBuf,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses arguments and executes the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => run_serve_command(args).await,
        Commands::Run(args) => run_job_command(args).await,
        Commands::Replay(args) => run_replay_command(args).await,
        Commands::Stages(args) => run_stages_command(args),
    }
}

async fn run_serve_command(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = args.pipeline.config()?;
    if let Some(bind) = args.bind {
        config = config.with_bind_addr(bind);
    }
    metrics::init_metrics().context("failed to initialize metrics")?;

    let bind_addr = config.bind_addr.clone();
    let service = Arc::new(ForgeService::from_config(config)?);
    let sweeper = service.spawn_sweeper();
    info!(bind = %bind_addr, "Starting demo-forge server");

    let served = api::serve(service, &bind_addr).await;
    sweeper.abort();
    served.with_context(|| format!("server on {} stopped", bind_addr))
}

async fn run_job_command(args: RunArgs) -> anyhow::Result<()> {
    let config = args.pipeline.config()?;
    let service = ForgeService::from_config(config)?;

    let handle = service.create_job(&args.source)?;
    let outcome = if args.json {
        service.run_job(Arc::clone(&handle)).await
    } else {
        let subscription = handle.subscribe().await;
        let printer = async move {
            let Some(mut subscription) = subscription else {
                return;
            };
            let mut printed = 0;
            while let Some(snapshot) = subscription.recv().await {
                printed = print_logs(&snapshot, printed);
            }
        };
        let (outcome, ()) = tokio::join!(service.run_job(Arc::clone(&handle)), printer);
        outcome
    };

    let job = handle.snapshot();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        print_summary(&job);
    }

    match outcome.failed_stage {
        Some(stage) => anyhow::bail!("job {} failed at stage '{}'", job.job_id, stage),
        None => Ok(()),
    }
}

/// Prints log entries from index `from` on and returns the new count.
fn print_logs(job: &Job, from: usize) -> usize {
    for entry in job.logs.iter().skip(from) {
        let stage = entry
            .stage_index
            .and_then(|i| job.stages.get(i))
            .map(|s| format!("[{}] ", s.name))
            .unwrap_or_default();
        let line = format!(
            "{} {:<7} {}{}",
            entry.timestamp.format("%H:%M:%S"),
            entry.level,
            stage,
            entry.message
        );
        if entry.level == LogLevel::Error || entry.level == LogLevel::Warning {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }
    job.logs.len().max(from)
}

fn print_summary(job: &Job) {
    println!();
    println!(
        "Job {} ({}): {} at {:.0}%",
        job.job_id,
        job.display_name.as_deref().unwrap_or(&job.source_reference),
        job.status,
        job.overall_progress
    );
    for stage in &job.stages {
        let elapsed = stage
            .elapsed_ms
            .map(|ms| format!("{} ms", ms))
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<17} {:<10} {}", stage.name, stage.status, elapsed);
        if let Some(error) = &stage.error {
            println!("    error: {}", error);
        }
    }
}

#[derive(Debug, Serialize)]
struct ReplayOutput {
    stage: String,
    summary: Option<serde_json::Value>,
    state: serde_json::Map<String, serde_json::Value>,
}

async fn run_replay_command(args: ReplayArgs) -> anyhow::Result<()> {
    let config = args.pipeline.config()?;
    let deps = build_deps(&config)?;
    let stages = StageVariantRegistry::from_config(&config)?.build(&deps)?;

    let result = replay_from_file(&stages, &args.stage, &args.snapshot)
        .await
        .with_context(|| format!("replaying '{}' from {}", args.stage, args.snapshot.display()))?;

    print_logs(&result.job, 0);
    let output = ReplayOutput {
        stage: args.stage,
        summary: result.output.summary,
        state: result.output.state.into_map(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_stages_command(args: PipelineArgs) -> anyhow::Result<()> {
    let config = args.config()?;
    let registry = StageVariantRegistry::from_config(&config)?;
    for (index, kind) in StageKind::ALL.iter().enumerate() {
        let supported: Vec<String> = kind
            .supported_variants()
            .iter()
            .map(|v| v.to_string())
            .collect();
        println!(
            "{}. {:<17} {:<10} (supports: {})",
            index + 1,
            kind.name(),
            registry.variant(*kind),
            supported.join(", ")
        );
    }
    if registry.requires_llm() && config.api_key.is_none() {
        println!("\nNo OPENROUTER_API_KEY set: pass --offline or select offline variants.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_flags() {
        let cli = Cli::try_parse_from([
            "demo-forge",
            "run",
            "https://acme.example",
            "--offline",
            "--snapshot-dir",
            "/tmp/snaps",
        ])
        .expect("should parse");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.source, "https://acme.example");
                assert!(args.pipeline.offline);
                assert_eq!(args.pipeline.snapshot_dir, Some(PathBuf::from("/tmp/snaps")));
                assert!(!args.json);
            }
            other => panic!("Expected Run command, got {:?}", other),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_pipeline_flags_override_config() {
        let cli = Cli::try_parse_from([
            "demo-forge",
            "stages",
            "--offline",
            "--reasoning-model",
            "acme/thinker",
            "--fetch-timeout-secs",
            "3",
            "--llm-timeout-secs",
            "45",
            "--job-ttl-secs",
            "120",
        ])
        .expect("should parse");
        let Commands::Stages(args) = cli.command else {
            panic!("Expected Stages command");
        };
        let config = args.config().expect("flags should produce a valid config");
        assert!(config.offline);
        assert_eq!(config.reasoning_model, "acme/thinker");
        assert_eq!(config.fetch_timeout, Duration::from_secs(3));
        assert_eq!(config.llm_timeout, Duration::from_secs(45));
        assert_eq!(config.job_ttl, Duration::from_secs(120));
    }

    #[test]
    fn test_zero_timeout_flag_is_rejected() {
        let cli = Cli::try_parse_from(["demo-forge", "stages", "--fetch-timeout-secs", "0"])
            .expect("should parse");
        let Commands::Stages(args) = cli.command else {
            panic!("Expected Stages command");
        };
        assert!(args.config().is_err());
    }

    #[test]
    fn test_replay_requires_stage_and_snapshot() {
        assert!(Cli::try_parse_from(["demo-forge", "replay", "--stage", "narrative"]).is_err());
        let cli = Cli::try_parse_from([
            "demo-forge",
            "replay",
            "--stage",
            "narrative",
            "--snapshot",
            "snap.json",
            "--log-level",
            "debug",
        ])
        .expect("should parse");
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Replay(ref a) if a.stage == "narrative"));
    }

    #[test]
    fn test_print_logs_returns_new_count() {
        let mut job = Job::new("j", "https://acme.example/", &["research"]);
        job.push_log(LogLevel::Info, "one", Some(0));
        job.push_log(LogLevel::Info, "two", None);
        assert_eq!(print_logs(&job, 0), 2);
        assert_eq!(print_logs(&job, 2), 2);
    }
}

//! CLI command definitions for flowforge.
//!
//! Turns a goal or a script into a Prefect deployment in one shot, or checks
//! an existing flow file.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Serialize;
use tracing::info;

use crate::generator::GenerationInput;
use crate::normalize::{check_flow_source, NormalizedArtifact};
use crate::pipeline::{
    DeployPipeline, PipelineConfig, PipelineFailure, PipelineReport, PlatformMode,
    TriggerOutcome,
};
use crate::vcs::VcsOutcome;

/// Generate, register and run Prefect flows from plain language.
#[derive(Parser)]
#[command(name = "flowforge")]
#[command(about = "Turn a goal or a script into a running Prefect deployment")]
#[command(version)]
#[command(
    long_about = "flowforge asks an LLM for a single-function Prefect flow, checks it statically, writes it to flows/<name>.py, registers a deployment and triggers a first run.\n\nExample usage:\n  flowforge deploy I want to see the price of ETH in USD every 5 minutes\n  flowforge from-script scripts/heaviest_pokemon.py --no-run\n  flowforge check flows/eth-price.py"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file. Environment variables and flags override it.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create a deployment from a natural-language goal.
    Deploy(DeployGoalArgs),

    /// Convert an existing script into a deployment.
    #[command(name = "from-script")]
    FromScript(FromScriptArgs),

    /// Statically check an existing flow file.
    Check(CheckArgs),
}

/// Arguments for `flowforge deploy`.
#[derive(Parser, Debug)]
pub struct DeployGoalArgs {
    /// What the flow should accomplish.
    #[arg(required = true, num_args = 1..)]
    pub goal: Vec<String>,

    #[command(flatten)]
    pub options: DeployOptions,
}

/// Arguments for `flowforge from-script`.
#[derive(Parser, Debug)]
pub struct FromScriptArgs {
    /// Path to the script to convert.
    pub path: PathBuf,

    #[command(flatten)]
    pub options: DeployOptions,
}

/// Options shared by the deploying commands.
#[derive(clap::Args, Debug, Clone)]
pub struct DeployOptions {
    /// Register the deployment without requesting a run.
    #[arg(long)]
    pub no_run: bool,

    /// Skip git add/commit/push of the flow file.
    #[arg(long)]
    pub no_vcs: bool,

    /// Generate and validate only, then print the flow file.
    #[arg(long)]
    pub dry_run: bool,

    /// Output JSON instead of text.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Prefect work pool for the deployment.
    #[arg(short = 'p', long)]
    pub work_pool: Option<String>,

    /// Prefect work queue for the deployment.
    #[arg(short = 'q', long)]
    pub work_queue: Option<String>,

    /// Directory flow files are written to.
    #[arg(long)]
    pub flows_dir: Option<PathBuf>,

    /// LLM model used for generation.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// OpenAI-compatible backend base URL.
    #[arg(long)]
    pub backend_endpoint: Option<String>,

    /// Backend API key (can also be set via FLOWFORGE_API_KEY or OPENROUTER_API_KEY).
    #[arg(long, env = "FLOWFORGE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// How to reach Prefect.
    #[arg(long, value_enum)]
    pub platform: Option<PlatformMode>,
}

/// Arguments for `flowforge check`.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Flow file to check.
    pub file: PathBuf,

    /// Deployment name the file belongs to (default: the file stem).
    #[arg(short, long)]
    pub name: Option<String>,

    /// Output JSON instead of text.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments without running any command.
///
/// Use this to access CLI options (like log_level) before running.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// Returns an error, and so a non-zero exit code, when the pipeline fails.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Deploy(args) => {
            let input = GenerationInput::goal(args.goal.join(" "));
            run_deploy_command(cli.config.as_deref(), input, args.options).await
        }
        Commands::FromScript(args) => {
            let input = GenerationInput::from_script_file(&args.path)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", args.path.display(), e))?;
            run_deploy_command(cli.config.as_deref(), input, args.options).await
        }
        Commands::Check(args) => run_check_command(args).await,
    }
}

/// Layers defaults, the YAML file, the environment and flags.
fn load_config(config_path: Option<&Path>, options: &DeployOptions) -> anyhow::Result<PipelineConfig> {
    let mut config = match config_path {
        Some(path) => PipelineConfig::from_yaml_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path.display(), e))?,
        None => PipelineConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;

    if let Some(ref pool) = options.work_pool {
        config.work_pool = pool.clone();
    }
    if let Some(ref queue) = options.work_queue {
        config.work_queue = Some(queue.clone());
    }
    if let Some(ref dir) = options.flows_dir {
        config.flows_dir = dir.clone();
    }
    if let Some(ref model) = options.model {
        config.generator.model = model.clone();
    }
    if let Some(ref endpoint) = options.backend_endpoint {
        config.generator.backend_endpoint = endpoint.clone();
    }
    if let Some(ref key) = options.api_key {
        config.generator.credential = Some(key.clone());
    }
    if let Some(mode) = options.platform {
        config.platform.mode = mode;
    }
    if options.no_run {
        config.trigger_run = false;
    }
    if options.no_vcs {
        config.vcs.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

// ============================================================================
// Deploy Command Implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct FailureOutput<'a> {
    status: &'static str,
    stage: String,
    kind: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<&'a Path>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vcs: Option<&'a VcsOutcome>,
}

#[derive(Debug, Serialize)]
struct DeployOutput<'a> {
    status: &'static str,
    #[serde(flatten)]
    report: &'a PipelineReport,
}

#[derive(Debug, Serialize)]
struct DryRunOutput<'a> {
    status: &'static str,
    #[serde(flatten)]
    normalized: &'a NormalizedArtifact,
}

async fn run_deploy_command(
    config_path: Option<&Path>,
    input: GenerationInput,
    options: DeployOptions,
) -> anyhow::Result<()> {
    let config = load_config(config_path, &options)?;
    let pipeline = DeployPipeline::from_config(&config)?;

    info!(
        mode = input.mode(),
        model = %config.generator.model,
        work_pool = %config.work_pool,
        platform = ?config.platform.mode,
        "Starting flowforge"
    );

    if options.dry_run {
        let normalized = pipeline
            .prepare(&input)
            .await
            .map_err(|failure| report_failure(failure, options.json))?;
        if options.json {
            let output = DryRunOutput {
                status: "validated",
                normalized: &normalized,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            print!("{}", normalized.contents);
        }
        return Ok(());
    }

    match pipeline.run(&input).await {
        Ok(report) => {
            if options.json {
                let output = DeployOutput {
                    status: "done",
                    report: &report,
                };
                let json_output = serde_json::to_string_pretty(&output)
                    .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
                println!("{}", json_output);
            } else {
                print_report(&report);
            }
            Ok(())
        }
        Err(failure) => Err(report_failure(failure, options.json)),
    }
}

fn failure_output(failure: &PipelineFailure) -> FailureOutput<'_> {
    FailureOutput {
        status: "failed",
        stage: failure.stage.to_string(),
        kind: failure.kind(),
        error: failure.error.to_string(),
        file: failure.file.as_deref(),
        vcs: failure.vcs.as_ref(),
    }
}

fn report_failure(failure: PipelineFailure, json: bool) -> anyhow::Error {
    if json {
        if let Ok(json_output) = serde_json::to_string_pretty(&failure_output(&failure)) {
            println!("{}", json_output);
        }
    } else if let Some(ref path) = failure.file {
        eprintln!("  Flow file kept at {} for manual registration", path.display());
    }
    anyhow::Error::new(failure)
}

fn print_report(report: &PipelineReport) {
    println!("✓ Deployment ready: {}", report.deployment);
    println!(
        "  File: {} ({})",
        report.path.display(),
        if report.file_changed { "written" } else { "unchanged" }
    );
    println!("  Entrypoint: {}", report.entrypoint);
    println!("  Deployment id: {}", report.deployment_id);
    match report.artifact.schedule {
        Some(ref schedule) => println!("  Schedule: {}", schedule),
        None => println!("  Schedule: none"),
    }
    match report.trigger {
        TriggerOutcome::Triggered { ref run_id } => println!("  Flow run: {}", run_id),
        TriggerOutcome::Failed { ref message } => println!("  Flow run: not started ({})", message),
        TriggerOutcome::Skipped => println!("  Flow run: skipped"),
    }
    match report.vcs {
        VcsOutcome::Pushed => println!("  Git: pushed"),
        VcsOutcome::Skipped => println!("  Git: skipped"),
        VcsOutcome::Failed { ref step, ref message } => {
            println!("  Git: {} failed ({})", step, message)
        }
    }
}

// ============================================================================
// Check Command Implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct CheckOutput {
    status: &'static str,
    file: PathBuf,
    name: String,
    function: Option<String>,
    is_async: bool,
    decorated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn run_check_command(args: CheckArgs) -> anyhow::Result<()> {
    let contents = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", args.file.display(), e))?;

    let name = match args.name {
        Some(name) => name,
        None => args
            .file
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow::anyhow!("Cannot derive a name from {}", args.file.display()))?,
    };

    let result = check_flow_source(&name, &contents);
    let output = match result {
        Ok(ref callable) => CheckOutput {
            status: "ok",
            file: args.file.clone(),
            name: name.clone(),
            function: Some(callable.name.clone()),
            is_async: callable.is_async,
            decorated: callable.flow_decorator().is_some(),
            error: None,
        },
        Err(ref e) => CheckOutput {
            status: "invalid",
            file: args.file.clone(),
            name: name.clone(),
            function: None,
            is_async: false,
            decorated: false,
            error: Some(e.to_string()),
        },
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if let Some(ref function) = output.function {
        println!("✓ {}: flow function '{}'", args.file.display(), function);
        println!("  Async: {}", if output.is_async { "yes" } else { "no" });
        println!(
            "  Decorated: {}",
            if output.decorated { "yes" } else { "no (flowforge adds @flow)" }
        );
    }

    result.map(|_| ()).map_err(anyhow::Error::new)
}

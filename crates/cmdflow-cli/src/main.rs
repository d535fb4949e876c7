//! cmdflow CLI
//!
//! ## Commands
//!
//! - `run`: execute a command definition against a session
//! - `resolve`: dry-run dynamic agent resolution for a task description
//! - `session show`: print a session's context and command history

mod echo;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cmdflow_core::{
    cancel_pair, CacheLayer, CapabilityRegistry, CapabilitySource, CommandDefinition,
    CommandResult, CommandSpan, DynamicAgentResolver, ExecutionCoordinator, ExecutionOptions,
    ModelProvider, OrchestratorConfig, PipelineEngine, ResolvedCommand, StrategyRegistry,
};
use cmdflow_state::{FileSessionManager, FsCacheStore, SessionId, SessionManager, SessionSnapshot};
use serde_json::Value;
use tracing::{info, warn, Level};

use crate::echo::{EchoProvider, ECHO_PROVIDER};

#[derive(Parser)]
#[command(name = "cmdflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run staged agent commands with dynamic agent selection", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and JSON results
    #[arg(long, global = true)]
    json: bool,

    /// Orchestrator config file (JSON)
    #[arg(long, global = true, env = "CMDFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding sessions and the output cache
    #[arg(long, global = true, env = "CMDFLOW_STATE_DIR", default_value = ".cmdflow")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a command definition
    Run {
        /// Command definition file (JSON)
        command_file: PathBuf,

        /// Positional arguments; the first one is the task description
        args: Vec<String>,

        /// Capability registry file enabling dynamic agent selection
        #[arg(long)]
        capabilities: Option<PathBuf>,

        /// Session to run in (a new one is created when omitted)
        #[arg(short, long)]
        session: Option<String>,

        /// Command flag as key=value; the value is parsed as JSON when possible
        #[arg(short, long = "flag", value_name = "KEY=VALUE")]
        flags: Vec<String>,

        /// Model name passed through to the provider
        #[arg(short, long)]
        model: Option<String>,

        /// Model provider
        #[arg(long, default_value = ECHO_PROVIDER)]
        provider: String,

        /// Wall-clock budget for the whole command
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Bypass the stage and command output cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Show which agent dynamic selection would pick
    Resolve {
        /// Task description
        description: String,

        /// Capability registry file
        #[arg(long)]
        capabilities: PathBuf,

        /// Target file considered by the context analyzer (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,

        /// Dependency considered by the context analyzer (repeatable)
        #[arg(long = "dependency")]
        dependencies: Vec<String>,

        /// Roles or selection criteria restricting the candidates
        #[arg(long = "criteria")]
        criteria: Vec<String>,
    },

    /// Inspect sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Print a session's context and command history
    Show {
        /// Session ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    cmdflow_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            command_file,
            args,
            capabilities,
            session,
            flags,
            model,
            provider,
            timeout_secs,
            no_cache,
        } => {
            let options = ExecutionOptions {
                args,
                flags: parse_flags(&flags)?.into_iter().collect(),
                model,
                timeout: timeout_secs.map(Duration::from_secs),
                ..ExecutionOptions::default()
            };
            cmd_run(
                &config,
                &cli.state_dir,
                RunTarget {
                    command_file: &command_file,
                    capabilities: capabilities.as_deref(),
                    session: session.as_deref(),
                    provider: &provider,
                    no_cache,
                },
                options,
                cli.json,
            )
            .await
        }
        Commands::Resolve {
            description,
            capabilities,
            files,
            dependencies,
            criteria,
        } => cmd_resolve(
            &config,
            &description,
            &capabilities,
            &files,
            &dependencies,
            &criteria,
            cli.json,
        ),
        Commands::Session { action } => match action {
            SessionAction::Show { id } => cmd_session_show(&cli.state_dir, &id, cli.json).await,
        },
    }
}

/// Defaults, overlaid by the optional config file, then by the environment.
fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    let config = match path {
        Some(path) => OrchestratorConfig::from_json_file(path)?,
        None => OrchestratorConfig::default(),
    };
    let config = config.apply_env()?;
    config.validate()?;
    Ok(config)
}

struct RunTarget<'a> {
    command_file: &'a Path,
    capabilities: Option<&'a Path>,
    session: Option<&'a str>,
    provider: &'a str,
    no_cache: bool,
}

async fn cmd_run(
    config: &OrchestratorConfig,
    state_dir: &Path,
    target: RunTarget<'_>,
    mut options: ExecutionOptions,
    json: bool,
) -> Result<()> {
    let command = load_command(target.command_file)?;
    let provider = provider_for(target.provider)?;

    let cache = open_cache(state_dir, target.no_cache)?;
    let engine = Arc::new(PipelineEngine::new(config.engine.clone()).with_cache(cache));

    let mut coordinator = ExecutionCoordinator::new(StrategyRegistry::with_defaults(engine));
    if let Some(path) = target.capabilities {
        coordinator = coordinator.with_resolver(Arc::new(run_resolver(config, path)));
    } else if command.dynamic_agent_selection {
        warn!(
            command = %command.name,
            "dynamic agent selection requested without --capabilities; using static agent"
        );
    }

    let session_id = target
        .session
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let session = FileSessionManager::open_or_create(state_dir, &session_id)
        .await
        .with_context(|| format!("Failed to open session '{}'", session_id))?;

    let (cancel, signal) = cancel_pair();
    options.cancel = signal;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; no further stages will start");
            cancel.cancel();
        }
    });

    let name = command.name.clone();
    let outcome = coordinator
        .execute_command(
            &name,
            ResolvedCommand::new(command, provider),
            options,
            Arc::new(session),
        )
        .await
        .with_context(|| format!("Failed to execute command '{}'", name))?;

    print_result(&outcome.result, json)?;

    if !outcome.result.success {
        bail!(
            "command '{}' failed: {}",
            name,
            outcome.result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn cmd_resolve(
    config: &OrchestratorConfig,
    description: &str,
    capabilities: &Path,
    files: &[String],
    dependencies: &[String],
    criteria: &[String],
    json: bool,
) -> Result<()> {
    let registry = CapabilityRegistry::load(CapabilitySource::Path(capabilities.to_path_buf()))
        .context("Failed to load capability registry")?;
    let resolver = DynamicAgentResolver::new(Arc::new(registry), config.resolver.clone());

    let mut snapshot = SessionSnapshot::new(SessionId::new("resolve"));
    if !files.is_empty() {
        snapshot
            .context
            .insert("targetFiles".to_string(), Value::from(files.to_vec()));
    }
    if !dependencies.is_empty() {
        snapshot
            .context
            .insert("dependencies".to_string(), Value::from(dependencies.to_vec()));
    }

    let _span = CommandSpan::enter("resolve", snapshot.session_id.as_str());
    let allowed = if criteria.is_empty() {
        None
    } else {
        resolver.allowed_candidates(Some(criteria))?
    };
    let selection = resolver.resolve_agent(description, &snapshot, allowed.as_ref())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&selection)?);
        return Ok(());
    }

    match &selection.selected_agent {
        Some(role) => println!("Selected: {} (confidence {:.2})", role, selection.confidence),
        None => println!("No agent matched; the command's static agent would run"),
    }
    if !selection.reasons.is_empty() {
        println!("Reasons:  {}", selection.reasons.join(", "));
    }
    for alt in &selection.alternatives {
        println!("  alt {} (score {:.3})", alt.role, alt.score);
    }
    println!("{}", selection.summary);

    Ok(())
}

async fn cmd_session_show(state_dir: &Path, id: &str, json: bool) -> Result<()> {
    let session = FileSessionManager::load(state_dir, id)
        .await
        .with_context(|| format!("Failed to load session '{}'", id))?;
    let snapshot = session.get_session().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("session {}", snapshot.session_id);
    println!(
        "Created: {}",
        snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();
    println!("Context:");
    if snapshot.context.is_empty() {
        println!("  (empty)");
    }
    for (key, value) in &snapshot.context {
        println!("  {} = {}", key, value);
    }
    println!();
    println!("History:");
    if snapshot.commands.is_empty() {
        println!("  (no commands run)");
    }
    for record in &snapshot.commands {
        let status = if record.success { "ok" } else { "failed" };
        println!(
            "  {} {} by {} [{}] {}ms",
            record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            record.command,
            record.agent,
            status,
            record.duration_ms
        );
    }

    Ok(())
}

fn load_command(path: &Path) -> Result<CommandDefinition> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read command file {}", path.display()))?;
    let command: CommandDefinition = serde_json::from_slice(&bytes)
        .with_context(|| format!("Invalid command file {}", path.display()))?;
    info!(command = %command.name, kind = %command.kind(), "loaded command definition");
    Ok(command)
}

/// Output cache under `<state_dir>/cache`, unless disabled.
fn open_cache(state_dir: &Path, no_cache: bool) -> Result<CacheLayer> {
    if no_cache {
        return Ok(CacheLayer::disabled());
    }
    let store = FsCacheStore::new(state_dir).context("Failed to open output cache")?;
    Ok(CacheLayer::new(Arc::new(store)))
}

/// Resolver for `run`. A registry that fails to load stays uninitialized, so
/// dynamic commands fall back to their static agent instead of aborting.
fn run_resolver(config: &OrchestratorConfig, path: &Path) -> DynamicAgentResolver {
    let mut registry = CapabilityRegistry::new(CapabilitySource::Path(path.to_path_buf()));
    if let Err(e) = registry.initialize() {
        warn!(
            path = %path.display(),
            error = %e,
            "capability registry unavailable; dynamic commands use their static agent"
        );
    }
    DynamicAgentResolver::new(Arc::new(registry), config.resolver.clone())
}

fn provider_for(name: &str) -> Result<Arc<dyn ModelProvider>> {
    match name {
        ECHO_PROVIDER => Ok(Arc::new(EchoProvider)),
        other => bail!("unknown provider '{}' (available: {})", other, ECHO_PROVIDER),
    }
}

/// Parse `key=value` pairs. Values that are valid JSON keep their type;
/// anything else becomes a string.
fn parse_flags(raw: &[String]) -> Result<Vec<(String, Value)>> {
    raw.iter()
        .map(|pair| -> Result<(String, Value)> {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("flag '{}' is not in KEY=VALUE form", pair))?;
            let key = key.trim();
            if key.is_empty() {
                bail!("flag '{}' has an empty key", pair);
            }
            let value = serde_json::from_str(value).unwrap_or_else(|_| Value::from(value));
            Ok((key.to_string(), value))
        })
        .collect()
}

fn print_result(result: &CommandResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    let status = if result.success { "succeeded" } else { "failed" };
    let cached = if result.cached { " (cached)" } else { "" };
    println!(
        "{} {}{} as {} in {}ms",
        result.command, status, cached, result.agent, result.duration_ms
    );
    println!("session {}", result.session_id);
    for stage in &result.stages {
        println!(
            "  {:<16} {:?} attempts={} {}ms",
            stage.stage_id, stage.status, stage.attempts, stage.duration_ms
        );
    }
    if let Some(error) = &result.error {
        println!("error: {}", error);
    }
    Ok(())
}

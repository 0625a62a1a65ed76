//! # relay
//!
//! 構成ファイル（TOML）に書いた handler とルートを使って、
//! envelope の検証・ルーティングの確認・タスクの実行を行う CLI。
//!
//! ## Commands
//!
//! - `relay validate --handler <name> <envelope.json>` - envelope を検証
//! - `relay route <problem_type> [--exhausted a,b]` - primary / 次の fallback を表示
//! - `relay run <problem_type> <description>` - CommandHandler 経由で実行
//! - `relay check` - 構成を読み込んで概要を表示

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use relay_core::app::{DispatchService, EnvelopeValidator};
use relay_core::domain::{DispatchOutcome, ProblemType, RouteError, TaskId};
use relay_core::impls::{CommandHandler, ParagraphSplitter};
use relay_core::RelayConfig;

/// Delegate tasks to specialized handlers and validate what they return
#[derive(Parser)]
#[command(name = "relay")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "RELAY_CONFIG",
        value_name = "FILE",
        default_value = "relay.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "RELAY_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an envelope file against a handler's schema
    Validate {
        /// Handler the envelope is expected to come from
        #[arg(long)]
        handler: String,

        /// JSON file holding the envelope
        file: PathBuf,
    },

    /// Show which handler a problem type routes to
    Route {
        problem_type: String,

        /// Handlers already tried, comma separated
        #[arg(long, value_delimiter = ',')]
        exhausted: Vec<String>,
    },

    /// Dispatch a task through the configured command handlers
    Run {
        problem_type: String,
        description: String,

        /// Allow splitting the description on blank lines
        #[arg(long)]
        split: bool,

        /// Override the default per-handler timeout
        #[arg(long, value_name = "SECS")]
        timeout_secs: Option<u64>,
    },

    /// Load the configuration and print a summary
    Check,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let config = RelayConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Validate { handler, file } => validate(&config, &handler, &file),
        Commands::Route {
            problem_type,
            exhausted,
        } => route(&config, &problem_type, exhausted),
        Commands::Run {
            problem_type,
            description,
            split,
            timeout_secs,
        } => run(&config, problem_type, description, split, timeout_secs).await,
        Commands::Check => check(&config, &cli.config),
    }
}

fn validate(config: &RelayConfig, handler: &str, file: &Path) -> Result<ExitCode> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let raw: serde_json::Value = serde_json::from_str(&content)
        .unwrap_or_else(|_| serde_json::Value::String(content.clone()));

    let registry = config
        .schema_registry()
        .context("Failed to build schema registry")?;
    let validator = EnvelopeValidator::new(Arc::new(registry));

    match validator.validate(&raw, handler) {
        Ok(envelope) => {
            println!("{}", serde_json::to_string_pretty(&envelope.to_value())?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{}: {e}", e.kind());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn route(config: &RelayConfig, problem_type: &str, exhausted: Vec<String>) -> Result<ExitCode> {
    let router = config.router();
    let problem_type = ProblemType::new(problem_type);
    let exhausted = exhausted.into_iter().collect();

    match router.next_fallback(&problem_type, &exhausted) {
        Ok(handler) => {
            println!("{handler}");
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ RouteError::HandlersExhausted(_)) => {
            println!("{}: {e}", e.kind());
            Ok(ExitCode::FAILURE)
        }
        Err(e) => bail!("{}: {e}", e.kind()),
    }
}

async fn run(
    config: &RelayConfig,
    problem_type: String,
    description: String,
    split: bool,
    timeout_secs: Option<u64>,
) -> Result<ExitCode> {
    let mut builder = config.builder().context("Invalid configuration")?;
    for h in &config.handlers {
        if let Some(command) = CommandHandler::from_argv(&h.name, &h.command) {
            builder = builder.handler(command)?;
        }
    }
    if split {
        builder = builder.splitter(ParagraphSplitter);
    }
    if let Some(secs) = timeout_secs {
        builder = builder.default_timeout(Duration::from_secs(secs));
    }
    let dispatcher = builder
        .build()
        .context("Every routed handler needs a `command` to be run from the CLI")?;

    let service = DispatchService::new(Arc::new(dispatcher));
    let task_id = service
        .submit(description, ProblemType::new(problem_type))
        .await?;
    info!(%task_id, "waiting for task");

    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let outcome = await_or_cancel(&service, task_id, interrupt).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(if outcome.is_done() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Wait for the outcome; when `interrupt` fires first the task is cancelled
/// and its `Cancelled` outcome returned.
async fn await_or_cancel(
    service: &DispatchService,
    task_id: TaskId,
    interrupt: impl Future<Output = ()>,
) -> Result<DispatchOutcome> {
    let outcome = tokio::select! {
        outcome = service.await_result(task_id, None) => outcome?,
        _ = interrupt => {
            warn!(%task_id, "interrupted, cancelling task");
            service.cancel(task_id).await;
            service.await_result(task_id, None).await?
        }
    };
    Ok(outcome)
}

fn check(config: &RelayConfig, path: &Path) -> Result<ExitCode> {
    config.builder().context("Invalid configuration")?;

    println!("config: {}", path.display());
    println!(
        "dispatch: default timeout {}s, max split depth {}",
        config.dispatch.default_timeout_secs, config.dispatch.max_split_depth
    );
    println!(
        "policy: max {} attempts, {} retry per handler, {} fallback",
        config.policy.max_attempts, config.policy.retries_per_handler, config.policy.max_fallbacks
    );

    println!("handlers ({}):", config.handlers.len());
    for h in &config.handlers {
        let command = if h.command.is_empty() {
            "(no command)".to_string()
        } else {
            h.command.join(" ")
        };
        println!(
            "  {} requires [{}] -> {}",
            h.name,
            h.required_fields.join(", "),
            command
        );
    }

    println!("routes ({}):", config.routes.len());
    for r in &config.routes {
        println!("  {} -> {}", r.problem_type, r.candidates.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exhausted_list_is_comma_separated() {
        let cli = Cli::parse_from(["relay", "route", "performance", "--exhausted", "a,b"]);
        match cli.command {
            Commands::Route { exhausted, .. } => assert_eq!(exhausted, vec!["a", "b"]),
            _ => panic!("expected route"),
        }
    }

    #[tokio::test]
    async fn interrupt_cancels_the_running_task() {
        use relay_core::RelayBuilder;
        use relay_core::domain::DispatchState;
        use relay_core::impls::ScriptedHandler;
        use relay_core::schema::HandlerSchema;

        let dispatcher = RelayBuilder::new()
            .schema(HandlerSchema::new("slow"))
            .unwrap()
            .route("analysis", ["slow"])
            .unwrap()
            .handler(ScriptedHandler::new("slow").hang())
            .unwrap()
            .build()
            .unwrap();
        let service = DispatchService::new(Arc::new(dispatcher));
        let task_id = service
            .submit("x", ProblemType::new("analysis"))
            .await
            .unwrap();

        let outcome = await_or_cancel(&service, task_id, async {}).await.unwrap();
        match outcome {
            DispatchOutcome::Cancelled(report) => {
                assert_eq!(report.cancelled_in, DispatchState::Awaiting)
            }
            other => panic!("expected Cancelled, got {other:?}"),
        }
        assert_eq!(service.pending().await, 0);
    }
}

//! Action Engine launcher - runs a command through the action engine
//!
//! Wires logging, configuration and the subprocess executor together; the
//! engine itself lives in `action-engine-core`.

mod command_action;

use action_engine_core::application::BackoffPolicy;
use action_engine_core::{ActionError, ActionsService, EngineConfig};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use command_action::{CommandExecutor, CommandOutput, CommandParams};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_CONFIG_PATH: &str = "~/.action-engine/config.json";

#[derive(Parser)]
#[command(name = "action-engine")]
#[command(about = "Run commands through the retrying action engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine config file (JSON)
    #[arg(long, env = "ACTION_ENGINE_CONFIG")]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command, retrying on failure
    Run {
        /// Retries after the first failed attempt
        #[arg(short, long, default_value = "0")]
        retries: u32,

        /// Delay before the first retry (ms)
        #[arg(long, default_value = "1000")]
        delay_ms: u64,

        /// Multiplier applied to the delay on every retry
        #[arg(long, default_value = "2.0")]
        backoff: f64,

        /// Timeout of the first attempt (ms); halved on every retry
        #[arg(long, default_value = "60000")]
        timeout_ms: u64,

        /// Working directory for the command
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Program and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Print the effective engine configuration
    Config,
}

fn init_logging() -> Result<()> {
    let log_format =
        std::env::var("ACTION_ENGINE_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("action_engine=info,action_engine_core=info"))
        .context("Failed to create env filter")?;

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}

/// Explicit file, else the default file if present, then env overrides
fn load_config(path: Option<&str>) -> Result<EngineConfig> {
    let base = match path {
        Some(path) => {
            let expanded = shellexpand::tilde(path).into_owned();
            EngineConfig::from_json_file(&expanded)
                .with_context(|| format!("Failed to load config from {expanded}"))?
        }
        None => {
            let default_path = PathBuf::from(shellexpand::tilde(DEFAULT_CONFIG_PATH).as_ref());
            if default_path.exists() {
                EngineConfig::from_json_file(&default_path).with_context(|| {
                    format!("Failed to load config from {}", default_path.display())
                })?
            } else {
                EngineConfig::default()
            }
        }
    };
    let config = base.with_env_overrides();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Run {
            retries,
            delay_ms,
            backoff,
            timeout_ms,
            cwd,
            json,
            command,
        } => {
            info!("Action Engine v{} starting...", VERSION);
            let Some((program, args)) = command.split_first() else {
                anyhow::bail!("No command given");
            };

            let service = ActionsService::new(config)?;
            let first_delay = Duration::from_millis(delay_ms);
            let policy = BackoffPolicy::exponential(first_delay, backoff, retries);
            service.register(CommandExecutor::new(policy));

            let handle = service.execute(CommandParams {
                program: program.clone(),
                args: args.to_vec(),
                working_dir: cwd,
                timeout: Duration::from_millis(timeout_ms),
            })?;
            let canceller = handle.canceller();

            let result = tokio::select! {
                result = handle => result,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, cancelling action");
                    canceller.cancel();
                    Err(ActionError::Cancelled)
                }
            };
            service.dispose();

            report(result, json)
        }
    }
}

fn report(result: std::result::Result<CommandOutput, ActionError>, json: bool) -> Result<()> {
    match result {
        Ok(output) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print!("{}", output.stdout);
                eprintln!(
                    "{} after {} attempt(s) in {}ms",
                    "✓ Succeeded".green().bold(),
                    output.attempt,
                    output.duration_ms
                );
            }
            Ok(())
        }
        Err(e) => {
            if e.is_cancelled() {
                eprintln!("{} {}", "✗".yellow().bold(), e.to_string().yellow());
            } else {
                eprintln!("{} {}", "✗".red().bold(), e.to_string().red());
            }
            std::process::exit(exit_code(&e));
        }
    }
}

/// 130 for an interrupted run, as a shell reports SIGINT
fn exit_code(error: &ActionError) -> i32 {
    if error.is_cancelled() {
        130
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_parses_trailing_command() {
        let cli = Cli::try_parse_from([
            "action-engine",
            "run",
            "--retries",
            "3",
            "--",
            "docker",
            "start",
            "-a",
            "dev",
        ])
        .unwrap();

        match cli.command {
            Commands::Run { retries, command, .. } => {
                assert_eq!(retries, 3);
                assert_eq!(command, vec!["docker", "start", "-a", "dev"]);
            }
            Commands::Config => panic!("expected run"),
        }
    }

    #[test]
    fn test_cancelled_run_exits_like_an_interrupt() {
        assert_eq!(exit_code(&ActionError::Cancelled), 130);
        assert_eq!(exit_code(&ActionError::Disposed), 1);
    }

    #[test]
    fn test_run_requires_a_command() {
        assert!(Cli::try_parse_from(["action-engine", "run"]).is_err());
    }

    #[test]
    fn test_missing_config_file_is_reported() {
        let err = load_config(Some("/nonexistent/action-engine.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }
}

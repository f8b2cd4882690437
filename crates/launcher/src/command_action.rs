// Subprocess action: run one external command, retried with backoff
use action_engine_core::application::BackoffPolicy;
use action_engine_core::{ActionContext, ActionExecutor, ActionParams, ActionStatus, RetryDecision};
use anyhow::{bail, Context};
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::time::{interval, timeout};
use tracing::{debug, warn};

/// Floor for the per-attempt timeout once it starts shrinking
pub const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// How often a running child checks for cancellation
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(20);

/// Environment variables passed through to children by default
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "USER", "LANG", "DOCKER_HOST"];

#[derive(Debug, Clone)]
pub struct CommandParams {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Timeout of the first attempt; halved on every retry
    pub timeout: Duration,
}

impl ActionParams for CommandParams {
    type Output = CommandOutput;
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub attempt: u32,
    pub duration_ms: u64,
}

pub struct CommandExecutor {
    backoff: BackoffPolicy,
    env_allowlist: Vec<String>,
}

impl CommandExecutor {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            backoff,
            env_allowlist: DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_env_allowlist(mut self, allowlist: Vec<String>) -> Self {
        self.env_allowlist = allowlist;
        self
    }

    /// Per-attempt timeout: halved on each retry, never below the floor
    pub fn attempt_timeout(context: &ActionContext<CommandParams>) -> Duration {
        let first = context.params().timeout;
        let halvings = u32::try_from(context.retry_index().max(0)).unwrap_or(0).min(16);
        let floor = MIN_ATTEMPT_TIMEOUT.min(first);
        (first / 2u32.pow(halvings)).max(floor)
    }

    /// Spawn the child; it is killed when its handle is dropped
    fn spawn(&self, params: &CommandParams) -> anyhow::Result<Child> {
        let mut command = Command::new(&params.program);
        command
            .args(&params.args)
            .env_clear()
            .envs(std::env::vars().filter(|(k, _)| self.env_allowlist.contains(k)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &params.working_dir {
            command.current_dir(dir);
        }
        command
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", params.program))
    }

    /// Run one attempt to completion, timeout or cancellation
    async fn run_child(
        &self,
        context: &ActionContext<CommandParams>,
    ) -> anyhow::Result<CommandOutput> {
        let params = context.params();
        let attempt_timeout = Self::attempt_timeout(context);
        let started = Instant::now();

        let child = self.spawn(params)?;
        let pid = child.id();
        debug!(pid = ?pid, timeout_ms = millis(attempt_timeout), "Child process started");

        let cancelled = async {
            let mut tick = interval(CANCEL_CHECK_INTERVAL);
            while !context.is_cancelled() {
                tick.tick().await;
            }
        };

        // Leaving a losing branch drops the child, which kills it
        let output = tokio::select! {
            waited = timeout(attempt_timeout, child.wait_with_output()) => match waited {
                Ok(output) => output
                    .with_context(|| format!("failed to wait for `{}`", params.program))?,
                Err(_) => {
                    warn!(pid = ?pid, reason = "timed out", "Killing child process");
                    bail!("`{}` timed out after {}ms", params.program, millis(started.elapsed()));
                }
            },
            _ = cancelled => {
                warn!(pid = ?pid, reason = "cancelled", "Killing child process");
                bail!("`{}` cancelled after {}ms", params.program, millis(started.elapsed()));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            bail!(
                "`{}` exited with {}: {}",
                params.program,
                exit_code,
                tail(&stderr, 200)
            );
        }

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
            attempt: context.attempt(),
            duration_ms: millis(started.elapsed()),
        })
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn tail(text: &str, max_chars: usize) -> &str {
    let trimmed = text.trim_end();
    match trimmed.char_indices().rev().nth(max_chars.saturating_sub(1)) {
        Some((idx, _)) => &trimmed[idx..],
        None => trimmed,
    }
}

impl ActionExecutor for CommandExecutor {
    type Params = CommandParams;

    /// Runs on the engine's blocking pool; drives the child on the engine's runtime
    fn execute(&self, context: &ActionContext<CommandParams>) -> anyhow::Result<CommandOutput> {
        let runtime = Handle::try_current()
            .context("command actions must run on a tokio runtime's blocking pool")?;
        runtime.block_on(self.run_child(context))
    }

    fn name(&self, context: &ActionContext<CommandParams>) -> String {
        format!("command:{}", context.params().program)
    }

    fn retry_after_error_delay(
        &self,
        context: &ActionContext<CommandParams>,
        _status: &dyn ActionStatus,
    ) -> anyhow::Result<RetryDecision> {
        Ok(self.backoff.decide_for(context, &self.name(context)))
    }
}

//! Engine configuration
//!
//! Defaults come from `application::worker::constants`; a JSON file and
//! `ACTION_ENGINE_*` environment variables can override them.

use crate::application::worker::constants::*;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const ENV_WORKERS: &str = "ACTION_ENGINE_WORKERS";
pub const ENV_MAX_IN_FLIGHT: &str = "ACTION_ENGINE_MAX_IN_FLIGHT";
pub const ENV_WATCH_INTERVAL_MS: &str = "ACTION_ENGINE_WATCH_INTERVAL_MS";
pub const ENV_STALL_MIN_AGE_MS: &str = "ACTION_ENGINE_STALL_MIN_AGE_MS";
pub const ENV_STALL_REPORT_INTERVAL_MS: &str = "ACTION_ENGINE_STALL_REPORT_INTERVAL_MS";
pub const ENV_STALL_WARN_AGE_MS: &str = "ACTION_ENGINE_STALL_WARN_AGE_MS";

/// Actions service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts running at the same time, across all actions
    pub worker_pool_size: usize,
    /// Hard cap on tracked, unresolved actions
    pub max_in_flight: usize,
    /// Stall watcher tick
    pub watch_interval_ms: u64,
    /// Actions younger than this are never reported
    pub stall_min_age_ms: i64,
    /// Minimum gap between two reports for the same action
    pub stall_report_interval_ms: i64,
    /// Age past which stall reports are logged as warnings
    pub stall_warn_age_ms: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            watch_interval_ms: DEFAULT_WATCH_INTERVAL_MS,
            stall_min_age_ms: DEFAULT_STALL_MIN_AGE_MS,
            stall_report_interval_ms: DEFAULT_STALL_REPORT_INTERVAL_MS,
            stall_warn_age_ms: DEFAULT_STALL_WARN_AGE_MS,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load a JSON config file; missing fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Apply `ACTION_ENGINE_*` overrides. Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_value(ENV_WORKERS) {
            self.worker_pool_size = v;
        }
        if let Some(v) = env_value(ENV_MAX_IN_FLIGHT) {
            self.max_in_flight = v;
        }
        if let Some(v) = env_value(ENV_WATCH_INTERVAL_MS) {
            self.watch_interval_ms = v;
        }
        if let Some(v) = env_value(ENV_STALL_MIN_AGE_MS) {
            self.stall_min_age_ms = v;
        }
        if let Some(v) = env_value(ENV_STALL_REPORT_INTERVAL_MS) {
            self.stall_report_interval_ms = v;
        }
        if let Some(v) = env_value(ENV_STALL_WARN_AGE_MS) {
            self.stall_warn_age_ms = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(AppError::Config("worker_pool_size must be at least 1".to_string()));
        }
        if self.max_in_flight == 0 {
            return Err(AppError::Config("max_in_flight must be at least 1".to_string()));
        }
        if self.watch_interval_ms == 0 {
            return Err(AppError::Config("watch_interval_ms must be positive".to_string()));
        }
        if self.stall_min_age_ms < 0 || self.stall_report_interval_ms < 0 || self.stall_warn_age_ms < 0 {
            return Err(AppError::Config("stall thresholds must not be negative".to_string()));
        }
        Ok(())
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}

fn env_value<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key = %key, value = %raw, "Ignoring unparseable config override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_desktop_limits() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_pool_size, 20);
        assert_eq!(config.max_in_flight, 1000);
        assert_eq!(config.watch_interval(), Duration::from_secs(5));
        assert_eq!(config.stall_min_age_ms, 120_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let config = EngineConfig {
            worker_pool_size: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("worker_pool_size"));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = EngineConfig {
            max_in_flight: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"worker_pool_size": 4, "stall_min_age_ms": 1000}"#).unwrap();
        assert_eq!(config.worker_pool_size, 4);
        assert_eq!(config.stall_min_age_ms, 1000);
        assert_eq!(config.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
    }

    #[test]
    fn test_env_override_and_bad_values() {
        // Single test touching these variables to avoid races between tests
        std::env::set_var(ENV_WORKERS, "7");
        std::env::set_var(ENV_MAX_IN_FLIGHT, "not-a-number");
        let config = EngineConfig::from_env();
        std::env::remove_var(ENV_WORKERS);
        std::env::remove_var(ENV_MAX_IN_FLIGHT);

        assert_eq!(config.worker_pool_size, 7);
        assert_eq!(config.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
    }
}

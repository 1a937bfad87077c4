//! Controller configuration.
//!
//! Settings come from defaults, a JSON document, or `CRONPATCH_*` environment
//! variables layered over the defaults.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cronpatch_core::{DEFAULT_MAX_SCHEDULE_ITERATIONS, PatchResolver};
use cronpatch_scheduler::RegistryConfig;

use crate::ConfigError;

const ENV_PREFIX: &str = "CRONPATCH_";

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub default_directive: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_directive: "cronpatch=info".to_string(),
        }
    }
}

/// Controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Seconds between full reconciliation passes.
    pub resync_interval_secs: u64,
    /// Annotation that freezes a target when set to `true`.
    pub skip_annotation: String,
    /// Whether skipping a frozen target still commits the resolution.
    pub advance_anchor_on_skip_marker: bool,
    /// Fire times walked per schedule before resolution gives up.
    pub max_schedule_iterations: usize,
    /// First retry delay after a transient failure.
    pub initial_retry_interval_ms: u64,
    /// Give up retrying a resource after this long.
    pub max_retry_elapsed_secs: u64,
    /// Longest the job timer sleeps between checks.
    pub registry_max_tick_secs: u64,
    pub log: LogConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_interval_secs: 60,
            skip_annotation: "cronpatch.dev/skip".to_string(),
            advance_anchor_on_skip_marker: false,
            max_schedule_iterations: DEFAULT_MAX_SCHEDULE_ITERATIONS,
            initial_retry_interval_ms: 500,
            max_retry_elapsed_secs: 300,
            registry_max_tick_secs: 60,
            log: LogConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `CRONPATCH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed by full variable name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |field: &str| lookup(&format!("{ENV_PREFIX}{field}"));
        let mut config = Self::default();

        if let Some(v) = env("RESYNC_INTERVAL_SECS") {
            config.resync_interval_secs = parse_var("RESYNC_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = env("SKIP_ANNOTATION") {
            config.skip_annotation = v;
        }
        if let Some(v) = env("ADVANCE_ANCHOR_ON_SKIP_MARKER") {
            config.advance_anchor_on_skip_marker = parse_var("ADVANCE_ANCHOR_ON_SKIP_MARKER", &v)?;
        }
        if let Some(v) = env("MAX_SCHEDULE_ITERATIONS") {
            config.max_schedule_iterations = parse_var("MAX_SCHEDULE_ITERATIONS", &v)?;
        }
        if let Some(v) = env("INITIAL_RETRY_INTERVAL_MS") {
            config.initial_retry_interval_ms = parse_var("INITIAL_RETRY_INTERVAL_MS", &v)?;
        }
        if let Some(v) = env("MAX_RETRY_ELAPSED_SECS") {
            config.max_retry_elapsed_secs = parse_var("MAX_RETRY_ELAPSED_SECS", &v)?;
        }
        if let Some(v) = env("REGISTRY_MAX_TICK_SECS") {
            config.registry_max_tick_secs = parse_var("REGISTRY_MAX_TICK_SECS", &v)?;
        }
        if let Some(v) = env("LOG") {
            config.log.default_directive = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the controller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resync_interval_secs == 0 {
            return Err(ConfigError::OutOfRange {
                field: "resync_interval_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.max_schedule_iterations == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_schedule_iterations",
                reason: "must be positive".to_string(),
            });
        }
        if self.registry_max_tick_secs == 0 {
            return Err(ConfigError::OutOfRange {
                field: "registry_max_tick_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.skip_annotation.trim().is_empty() {
            return Err(ConfigError::OutOfRange {
                field: "skip_annotation",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn initial_retry_interval(&self) -> Duration {
        Duration::from_millis(self.initial_retry_interval_ms)
    }

    pub fn max_retry_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_retry_elapsed_secs)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_tick: Duration::from_secs(self.registry_max_tick_secs),
        }
    }

    pub fn resolver(&self) -> PatchResolver {
        PatchResolver::with_max_iterations(self.max_schedule_iterations)
    }
}

fn parse_var<T>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: format!("{ENV_PREFIX}{field}"),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

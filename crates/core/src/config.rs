use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SluiceError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Reads profiled keys: tries {PROFILE}_{KEY} first, falls back to {KEY}.
struct ProfiledLookup<'a, F: Fn(&str) -> Option<String>> {
    profile: &'a str,
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> ProfiledLookup<'_, F> {
    fn opt(&self, key: &str) -> Option<String> {
        if !self.profile.is_empty() {
            let prefixed = format!("{}_{}", self.profile, key);
            if let Some(v) = (self.lookup)(&prefixed).filter(|s| !s.is_empty()) {
                return Some(v);
            }
        }
        (self.lookup)(key).filter(|s| !s.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T, SluiceError> {
        match self.opt(key) {
            Some(raw) => raw
                .parse()
                .map_err(|_| SluiceError::Config(format!("invalid value '{raw}' for {key}"))),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, SluiceError> {
        match self.opt(key).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(SluiceError::Config(format!(
                "invalid boolean '{other}' for {key}"
            ))),
        }
    }
}

// ── Strategy selectors ────────────────────────────────────────

/// Which failover strategy computes restart sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailoverStrategyKind {
    /// Restart the failed pipelined region plus what it drags in.
    #[default]
    Region,
    /// Restart every task of the job.
    Full,
}

impl FromStr for FailoverStrategyKind {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "region" => Ok(Self::Region),
            "full" => Ok(Self::Full),
            other => Err(SluiceError::Config(format!(
                "unknown failover strategy '{other}', expected 'region' or 'full'"
            ))),
        }
    }
}

/// Which strategy decides when consumed partition groups may be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PartitionReleaseKind {
    #[default]
    Region,
    Never,
}

impl FromStr for PartitionReleaseKind {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "region" => Ok(Self::Region),
            "never" => Ok(Self::Never),
            other => Err(SluiceError::Config(format!(
                "unknown partition release strategy '{other}', expected 'region' or 'never'"
            ))),
        }
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub checkpoint: CheckpointConfig,
    pub scheduling: SchedulingConfig,
    pub executor: ExecutorConfig,
    pub log: LogConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SLUICE_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, SluiceError> {
        let profile = env_or("SLUICE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Result<Self, SluiceError> {
        Self::from_lookup(profile, env_opt)
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(profile: &str, lookup: F) -> Result<Self, SluiceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let p = profile.to_uppercase();
        let env = ProfiledLookup {
            profile: &p,
            lookup,
        };
        Ok(Self {
            profile: p.clone(),
            checkpoint: CheckpointConfig::from_lookup(&env)?,
            scheduling: SchedulingConfig::from_lookup(&env)?,
            executor: ExecutorConfig::from_lookup(&env)?,
            log: LogConfig::from_lookup(&env),
        })
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  checkpoint:  after_tasks_finished={}",
            self.checkpoint.allow_checkpoints_after_tasks_finished
        );
        tracing::info!(
            "  scheduling:  failover={:?}, partition_release={:?}",
            self.scheduling.failover_strategy,
            self.scheduling.partition_release
        );
        tracing::info!("  executor:    queue_capacity={}", self.executor.queue_capacity);
    }
}

// ── Checkpointing ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Whether checkpoints may still be taken once some tasks have finished.
    pub allow_checkpoints_after_tasks_finished: bool,
}

impl CheckpointConfig {
    fn from_lookup<F: Fn(&str) -> Option<String>>(
        env: &ProfiledLookup<'_, F>,
    ) -> Result<Self, SluiceError> {
        Ok(Self {
            allow_checkpoints_after_tasks_finished: env
                .flag("SLUICE_CHECKPOINT_AFTER_TASKS_FINISHED", true)?,
        })
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            allow_checkpoints_after_tasks_finished: true,
        }
    }
}

// ── Scheduling strategies ─────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulingConfig {
    pub failover_strategy: FailoverStrategyKind,
    pub partition_release: PartitionReleaseKind,
}

impl SchedulingConfig {
    fn from_lookup<F: Fn(&str) -> Option<String>>(
        env: &ProfiledLookup<'_, F>,
    ) -> Result<Self, SluiceError> {
        Ok(Self {
            failover_strategy: env.or("SLUICE_FAILOVER_STRATEGY", "region").parse()?,
            partition_release: env.or("SLUICE_PARTITION_RELEASE", "region").parse()?,
        })
    }
}

// ── Control executor ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Bound of the control executor's work queue.
    pub queue_capacity: usize,
}

impl ExecutorConfig {
    fn from_lookup<F: Fn(&str) -> Option<String>>(
        env: &ProfiledLookup<'_, F>,
    ) -> Result<Self, SluiceError> {
        let queue_capacity = env.parsed("SLUICE_EXECUTOR_QUEUE_CAPACITY", 1024usize)?;
        if queue_capacity == 0 {
            return Err(SluiceError::Config(
                "SLUICE_EXECUTOR_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }
        Ok(Self { queue_capacity })
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

// ── Logging ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Fallback `EnvFilter` directive when `RUST_LOG` is unset.
    pub filter: String,
}

impl LogConfig {
    fn from_lookup<F: Fn(&str) -> Option<String>>(env: &ProfiledLookup<'_, F>) -> Self {
        Self {
            filter: env.or("SLUICE_LOG", "info"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

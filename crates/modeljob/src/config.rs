//! Scheduler configuration (modeljob.toml)
//!
//! Values come from, in increasing priority: built-in defaults, a TOML file,
//! and `MODELJOB_*` environment variables.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding [`PoolConfig::core_threads`]
pub const ENV_CORE_POOL_SIZE: &str = "MODELJOB_CORE_POOL_SIZE";
/// Environment variable overriding [`PoolConfig::max_threads`]
pub const ENV_MAX_POOL_SIZE: &str = "MODELJOB_MAX_POOL_SIZE";
/// Environment variable overriding [`PoolConfig::keep_alive_secs`]
pub const ENV_KEEP_ALIVE_SECS: &str = "MODELJOB_KEEP_ALIVE_SECS";
/// Environment variable overriding [`PoolConfig::queue_capacity`]
pub const ENV_QUEUE_CAPACITY: &str = "MODELJOB_QUEUE_CAPACITY";

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    /// Threads kept alive even when idle
    pub core_threads: usize,

    /// Upper bound on live threads. Jobs parked in a blocking condition keep
    /// their thread, so this must be well above the expected number of owners.
    pub max_threads: usize,

    /// Seconds an idle thread above `core_threads` waits before exiting
    pub keep_alive_secs: u64,

    /// Jobs allowed to wait for a thread once `max_threads` are busy
    pub queue_capacity: usize,

    /// Worker thread name prefix
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_threads: num_cpus::get(),
            max_threads: 512,
            keep_alive_secs: 60,
            queue_capacity: 1024,
            thread_name_prefix: "model-thread".to_string(),
        }
    }
}

impl PoolConfig {
    /// Idle timeout for threads above the core size
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Fit a defaulted `core_threads` under an explicit `max_threads`
    fn clamp_core_threads(&mut self) {
        self.core_threads = self.core_threads.min(self.max_threads);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 {
            return Err(ConfigError::ValidationError(
                "pool.max_threads must be at least 1".to_string(),
            ));
        }
        if self.core_threads > self.max_threads {
            return Err(ConfigError::ValidationError(format!(
                "pool.core_threads ({}) exceeds pool.max_threads ({})",
                self.core_threads, self.max_threads
            )));
        }
        Ok(())
    }
}

/// Top-level scheduler configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker pool settings
    pub pool: PoolConfig,

    /// Expiration applied to jobs scheduled without an explicit one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_expiration_ms: Option<u64>,
}

impl SchedulerConfig {
    /// Parse a configuration from TOML text
    ///
    /// When the file sets `pool.max_threads` but not `pool.core_threads`, the
    /// default core size is lowered to fit.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(content)?;
        let core_given = table
            .get("pool")
            .and_then(|pool| pool.get("core_threads"))
            .is_some();

        let mut config: SchedulerConfig = toml::Value::Table(table).try_into()?;
        if !core_given {
            config.pool.clamp_core_threads();
        }
        config.pool.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Apply `MODELJOB_*` overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let core = parse_var(&lookup, ENV_CORE_POOL_SIZE)?;
        if let Some(v) = core {
            self.pool.core_threads = v as usize;
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_POOL_SIZE)? {
            self.pool.max_threads = v as usize;
            if core.is_none() {
                self.pool.clamp_core_threads();
            }
        }
        if let Some(v) = parse_var(&lookup, ENV_KEEP_ALIVE_SECS)? {
            self.pool.keep_alive_secs = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_QUEUE_CAPACITY)? {
            self.pool.queue_capacity = v as usize;
        }
        self.pool.validate()?;
        Ok(self)
    }

    /// Default job expiration, if configured
    pub fn default_expiration(&self) -> Option<Duration> {
        self.default_expiration_ms.map(Duration::from_millis)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(format!("Failed to serialize config: {}", e)))
    }
}

fn parse_var<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
            ConfigError::ValidationError(format!("{} must be a non-negative integer, got '{}'", key, raw))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.pool.core_threads, num_cpus::get());
        assert_eq!(config.pool.keep_alive(), Duration::from_secs(60));
        assert_eq!(config.default_expiration(), None);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = SchedulerConfig::from_toml_str(
            r#"
default_expiration_ms = 250

[pool]
core_threads = 2
max_threads = 16
"#,
        )
        .unwrap();

        assert_eq!(config.pool.core_threads, 2);
        assert_eq!(config.pool.max_threads, 16);
        assert_eq!(config.pool.queue_capacity, 1024);
        assert_eq!(config.pool.thread_name_prefix, "model-thread");
        assert_eq!(config.default_expiration(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_rejects_inconsistent_pool() {
        let err = SchedulerConfig::from_toml_str("[pool]\ncore_threads = 8\nmax_threads = 4\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = SchedulerConfig::from_toml_str("[pool]\ncore_threads = 0\nmax_threads = 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_max_threads_alone_lowers_default_core() {
        let config = SchedulerConfig::from_toml_str("[pool]\nmax_threads = 1\n").unwrap();
        assert_eq!(config.pool.max_threads, 1);
        assert_eq!(config.pool.core_threads, 1);

        let config = SchedulerConfig::from_toml_str("[pool]\nmax_threads = 4096\n").unwrap();
        assert_eq!(config.pool.core_threads, num_cpus::get().min(4096));
    }

    #[test]
    fn test_max_pool_override_alone_lowers_core() {
        let config = SchedulerConfig::default()
            .with_overrides(|key| (key == ENV_MAX_POOL_SIZE).then(|| "1".to_string()))
            .unwrap();
        assert_eq!(config.pool.core_threads, 1);
        assert_eq!(config.pool.max_threads, 1);

        let err = SchedulerConfig::default()
            .with_overrides(|key| match key {
                ENV_CORE_POOL_SIZE => Some("4".to_string()),
                ENV_MAX_POOL_SIZE => Some("2".to_string()),
                _ => None,
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = SchedulerConfig::from_toml_str("[pool\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_CORE_POOL_SIZE, "1"),
            (ENV_MAX_POOL_SIZE, "3"),
            (ENV_KEEP_ALIVE_SECS, " 5 "),
        ]
        .into_iter()
        .collect();

        let config = SchedulerConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.pool.core_threads, 1);
        assert_eq!(config.pool.max_threads, 3);
        assert_eq!(config.pool.keep_alive_secs, 5);
        assert_eq!(config.pool.queue_capacity, 1024);
    }

    #[test]
    fn test_override_not_a_number() {
        let err = SchedulerConfig::default()
            .with_overrides(|key| (key == ENV_QUEUE_CAPACITY).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_QUEUE_CAPACITY));
    }

    #[test]
    fn test_from_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[pool]\ncore_threads = 1\nmax_threads = 2\nthread_name_prefix = \"session\"\n").unwrap();

        let config = SchedulerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pool.thread_name_prefix, "session");

        let rendered = config.to_toml_string().unwrap();
        assert_eq!(SchedulerConfig::from_toml_str(&rendered).unwrap(), config);
    }
}

//! CLI command implementations

pub mod config;
pub mod stress;

use anyhow::Context;
use modeljob::SchedulerConfig;
use std::path::Path;

/// Load the configuration file (or defaults) and apply `MODELJOB_*` overrides.
pub(crate) fn load_config(path: Option<&Path>) -> anyhow::Result<SchedulerConfig> {
    let config = match path {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => SchedulerConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

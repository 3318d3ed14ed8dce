// src/config/loader.rs

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file and return the raw, unvalidated `RawConfigFile`.
///
/// This only performs TOML deserialization. Use [`load_and_validate`] to
/// also build the DAG.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;
    debug!(path = %path.display(), tasks = config.task.len(), "config parsed");

    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// - Reads TOML and applies defaults.
/// - Checks run and warehouse settings and every task's parameters.
/// - Builds the DAG, which rejects dangling `after` references, cycles,
///   ambiguous start tasks and unreachable tasks.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

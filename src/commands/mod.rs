// src/commands/mod.rs
//! Command handlers for the catalog-sync CLI

mod query;
mod repo;
mod update;

pub use query::cmd_search;
pub use repo::{
    cmd_init, cmd_repo_add, cmd_repo_disable, cmd_repo_enable, cmd_repo_list, cmd_repo_remove,
    cmd_repo_reset_fingerprint,
};
pub use update::{cmd_cleanup, cmd_update};

use anyhow::{Context, Result};
use catalog_sync::UpdaterConfig;
use std::path::{Path, PathBuf};

/// Resolve the effective configuration from the config file and CLI overrides
pub fn load_config(config: Option<&Path>, db_path: Option<PathBuf>) -> Result<UpdaterConfig> {
    let mut config = match config {
        Some(path) => UpdaterConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => UpdaterConfig::default(),
    };
    if let Some(db_path) = db_path {
        config.db_path = db_path;
    }
    Ok(config)
}

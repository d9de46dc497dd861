// src/commands/repo.rs
//! Repository management commands

use anyhow::Result;
use catalog_sync::{Repository, SqliteStore, UpdaterConfig};
use chrono::{DateTime, Utc};
use tracing::info;

/// Initialize the catalog database
pub fn cmd_init(config: &UpdaterConfig) -> Result<()> {
    catalog_sync::db::init(&config.db_path)?;
    println!(
        "Database initialized successfully at: {}",
        config.db_path.display()
    );
    Ok(())
}

/// Add a new repository
pub fn cmd_repo_add(
    config: &UpdaterConfig,
    address: &str,
    fingerprint: Option<&str>,
    disabled: bool,
) -> Result<()> {
    info!("Adding repository: {}", address);
    let store = SqliteStore::open(&config.db_path)?;
    let repository = match fingerprint {
        Some(fingerprint) => Repository::with_pinned(address, fingerprint),
        None => Repository::new(address),
    };
    let repository = store.add_repository(&Repository {
        enabled: !disabled,
        ..repository
    })?;

    println!("Added repository {}: {}", repository.id, repository.address);
    println!("  Enabled: {}", repository.enabled);
    if !repository.fingerprint.is_empty() {
        println!("  Fingerprint: {}", repository.fingerprint);
    }
    Ok(())
}

/// List repositories
pub fn cmd_repo_list(config: &UpdaterConfig) -> Result<()> {
    let store = SqliteStore::open(&config.db_path)?;
    let repositories = store.repositories()?;

    if repositories.is_empty() {
        println!("No repositories configured");
        return Ok(());
    }

    println!("Repositories:");
    for repo in repositories {
        let enabled_mark = if repo.enabled { "[x]" } else { "[ ]" };
        let sync_status = DateTime::<Utc>::from_timestamp_millis(repo.updated)
            .filter(|_| repo.updated > 0)
            .map(|ts| format!("updated {}", ts.format("%Y-%m-%d %H:%M")))
            .unwrap_or_else(|| "never updated".to_string());
        println!(
            "  {} {:>3} {} ({}, {} products)",
            enabled_mark,
            repo.id,
            repo.display_name(),
            sync_status,
            store.product_count(repo.id)?
        );
        println!("      {}", repo.address);
        if !repo.fingerprint.is_empty() {
            println!("      signer {}", repo.fingerprint);
        }
    }
    Ok(())
}

pub fn cmd_repo_enable(config: &UpdaterConfig, id: i64) -> Result<()> {
    let store = SqliteStore::open(&config.db_path)?;
    let repo = store.set_enabled(id, true)?;
    println!("Enabled repository: {}", repo.display_name());
    Ok(())
}

pub fn cmd_repo_disable(config: &UpdaterConfig, id: i64) -> Result<()> {
    let store = SqliteStore::open(&config.db_path)?;
    let repo = store.set_enabled(id, false)?;
    println!("Disabled repository: {}", repo.display_name());
    Ok(())
}

/// Mark a repository removed
pub fn cmd_repo_remove(config: &UpdaterConfig, id: i64) -> Result<()> {
    info!("Removing repository: {}", id);
    let store = SqliteStore::open(&config.db_path)?;
    store.mark_deleted(id)?;
    println!("Removed repository {} (run `catalog-sync cleanup` to drop its catalog)", id);
    Ok(())
}

pub fn cmd_repo_reset_fingerprint(config: &UpdaterConfig, id: i64) -> Result<()> {
    let store = SqliteStore::open(&config.db_path)?;
    let repo = store.reset_fingerprint(id)?;
    println!(
        "Cleared pinned signer of {}; the next update pins a new one",
        repo.display_name()
    );
    Ok(())
}

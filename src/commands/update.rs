// src/commands/update.rs
//! Catalog update and cleanup commands

use anyhow::{bail, Result};
use catalog_sync::{
    CancelToken, CliProgress, HttpDownloader, IndexStore, LogProgress, RepositoryUpdater,
    SqliteStore, UpdateOutcome, UpdateProgress, UpdaterConfig,
};
use std::sync::Arc;
use tracing::{error, info};

/// Update one repository, or every enabled one
pub fn cmd_update(config: UpdaterConfig, id: Option<i64>, quiet: bool) -> Result<()> {
    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let repositories = match id {
        Some(id) => match store.repository(id)? {
            Some(repo) if repo.deleted => bail!("Repository {} not found", id),
            Some(repo) if !repo.enabled => bail!("Repository {} is disabled", id),
            Some(repo) => vec![repo],
            None => bail!("Repository {} not found", id),
        },
        None => store
            .repositories()?
            .into_iter()
            .filter(|repo| repo.enabled)
            .collect(),
    };
    if repositories.is_empty() {
        println!("No enabled repositories to update");
        return Ok(());
    }

    let updater = RepositoryUpdater::new(config, store, Arc::new(HttpDownloader::new()?));
    let cancel = CancelToken::new();
    let mut failed = 0;

    for repo in &repositories {
        let progress: Box<dyn UpdateProgress> = if quiet {
            Box::new(LogProgress::new(repo.display_name()))
        } else {
            Box::new(CliProgress::new(repo.display_name()))
        };

        match updater.update(repo, &cancel, progress.as_ref()) {
            Ok(UpdateOutcome::Unchanged) => println!("{}: up to date", repo.display_name()),
            Ok(UpdateOutcome::Updated { repository, products }) => {
                drop(progress);
                println!("{}: {} products", repository.display_name(), products);
            }
            Ok(UpdateOutcome::Cancelled) if cancel.is_cancelled() => {
                println!("{}: cancelled", repo.display_name());
                break;
            }
            Ok(UpdateOutcome::Cancelled) => {
                println!("{}: disabled during update, skipped", repo.display_name());
            }
            Err(e) => {
                drop(progress);
                error!("Failed to update {}: {}", repo.display_name(), e);
                eprintln!("{}: {}", repo.display_name(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} repositories failed to update", failed, repositories.len());
    }
    Ok(())
}

/// Drop catalogs of disabled and deleted repositories
pub fn cmd_cleanup(config: UpdaterConfig) -> Result<()> {
    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let updater = RepositoryUpdater::new(config, store, Arc::new(HttpDownloader::new()?));
    let cleaned = updater.cleanup_removed()?;
    info!("Cleanup finished");
    println!("Cleaned up {} repositories", cleaned);
    Ok(())
}

// src/update/commit.rs

//! Stage / commit / rollback lifecycle of one update attempt
//!
//! ```text
//! STAGING -> COMMITTED
//!         -> ROLLED_BACK
//! ```
//!
//! A [`StagedUpdate`] that is dropped while still staging rolls back, so
//! every early return out of the pipeline leaves the live catalog untouched.

use crate::db::IndexStore;
use crate::error::{Error, Result, UpdateError};
use crate::model::{Product, Repository};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Phase of a staged update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitState {
    /// Products are being written to the staging area
    Staging,
    /// Staged products replaced the live catalog
    Committed,
    /// Staging area discarded
    RolledBack,
}

/// Reject a catalog older than the one already committed
pub fn validate_timestamp(stored: i64, incoming: i64) -> Result<()> {
    if incoming < stored {
        return Err(UpdateError::validation(format!(
            "Catalog timestamp {incoming} is older than the committed {stored}"
        ))
        .into());
    }
    Ok(())
}

/// An open staging area for one repository
pub struct StagedUpdate<'a> {
    store: &'a dyn IndexStore,
    finalize_lock: &'a Mutex<()>,
    original: Repository,
    state: CommitState,
    staged: u64,
}

impl<'a> StagedUpdate<'a> {
    /// Create the staging area for `original`
    ///
    /// `finalize_lock` is held around the concluding store call, never
    /// while staging.
    pub fn begin(
        store: &'a dyn IndexStore,
        finalize_lock: &'a Mutex<()>,
        original: &Repository,
    ) -> Result<Self> {
        store.create_staging_area()?;
        debug!("Staging catalog of repository {}", original.id);
        Ok(Self {
            store,
            finalize_lock,
            original: original.clone(),
            state: CommitState::Staging,
            staged: 0,
        })
    }

    pub fn state(&self) -> CommitState {
        self.state
    }

    /// Number of products staged so far
    pub fn staged(&self) -> u64 {
        self.staged
    }

    /// Write a page of transformed products into the staging area
    pub fn stage(&mut self, products: &[Product]) -> Result<()> {
        self.require_staging()?;
        self.store.write_staged(self.original.id, products)?;
        self.staged += products.len() as u64;
        Ok(())
    }

    /// Replace the live catalog with the staged one and persist `updated`
    ///
    /// `updated` is applied on top of the stored repository: the timestamp
    /// is checked again, and a repository disabled or removed meanwhile is
    /// not committed ([`Error::Cancelled`]). On failure the attempt rolls
    /// back when `self` is dropped.
    pub fn commit(mut self, updated: Repository) -> Result<Repository> {
        self.require_staging()?;

        let stored = self
            .store
            .repository(self.original.id)?
            .ok_or_else(|| Error::NotFound(format!("Repository {}", self.original.id)))?;
        if !stored.enabled || stored.deleted {
            info!(
                "Repository {} was disabled during the update, discarding staged catalog",
                stored.id
            );
            return Err(Error::Cancelled);
        }
        validate_timestamp(stored.timestamp, updated.timestamp)?;
        let updated = Repository {
            address: stored.address,
            enabled: stored.enabled,
            deleted: stored.deleted,
            ..updated
        };

        {
            let _guard = self.finalize_lock.lock();
            self.store.finalize(&updated, true)?;
        }
        self.state = CommitState::Committed;
        info!(
            "Committed {} products for repository {}",
            self.staged, updated.id
        );
        Ok(updated)
    }

    /// Discard the staging area
    pub fn rollback(mut self) -> Result<()> {
        self.rollback_in_place()
    }

    fn rollback_in_place(&mut self) -> Result<()> {
        self.require_staging()?;
        // Marked first so a failing finalize is not retried from Drop
        self.state = CommitState::RolledBack;
        let _guard = self.finalize_lock.lock();
        self.store.finalize(&self.original, false)?;
        debug!("Rolled back staging of repository {}", self.original.id);
        Ok(())
    }

    fn require_staging(&self) -> Result<()> {
        if self.state != CommitState::Staging {
            return Err(Error::InitError(format!(
                "Staged update is already {:?}",
                self.state
            )));
        }
        Ok(())
    }
}

impl Drop for StagedUpdate<'_> {
    fn drop(&mut self) {
        if self.state == CommitState::Staging {
            warn!("Rolling back unfinished update of repository {}", self.original.id);
            if let Err(e) = self.rollback_in_place() {
                warn!("Rollback failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::error::UpdateErrorKind;

    fn setup() -> (SqliteStore, Repository) {
        let store = SqliteStore::open_in_memory().unwrap();
        let repo = store
            .add_repository(&Repository {
                timestamp: 100,
                ..Repository::new("https://example.org/repo")
            })
            .unwrap();
        (store, repo)
    }

    fn product(repository_id: i64) -> Product {
        Product {
            repository_id,
            package_name: "org.example".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_timestamp() {
        assert!(validate_timestamp(100, 100).is_ok());
        assert!(validate_timestamp(100, 101).is_ok());
        let err = validate_timestamp(100, 99).unwrap_err();
        assert_eq!(err.update_kind(), Some(UpdateErrorKind::Validation));
    }

    #[test]
    fn test_commit() {
        let (store, repo) = setup();
        let lock = Mutex::new(());

        let mut staged = StagedUpdate::begin(&store, &lock, &repo).unwrap();
        staged.stage(&[product(repo.id)]).unwrap();
        assert_eq!(staged.staged(), 1);

        let updated = Repository {
            timestamp: 200,
            ..repo.clone()
        };
        let committed = staged.commit(updated.clone()).unwrap();

        assert_eq!(committed, updated);
        assert_eq!(store.product_count(repo.id).unwrap(), 1);
    }

    #[test]
    fn test_commit_rejects_older_timestamp() {
        let (store, repo) = setup();
        let lock = Mutex::new(());

        let mut staged = StagedUpdate::begin(&store, &lock, &repo).unwrap();
        staged.stage(&[product(repo.id)]).unwrap();

        let older = Repository {
            timestamp: 50,
            ..repo.clone()
        };
        let err = staged.commit(older).unwrap_err();
        assert_eq!(err.update_kind(), Some(UpdateErrorKind::Validation));
        assert_eq!(store.product_count(repo.id).unwrap(), 0);
        assert_eq!(
            IndexStore::repository(&store, repo.id).unwrap().unwrap().timestamp,
            100
        );
    }

    #[test]
    fn test_commit_skips_repository_disabled_while_staging() {
        let (store, repo) = setup();
        let lock = Mutex::new(());

        let mut staged = StagedUpdate::begin(&store, &lock, &repo).unwrap();
        staged.stage(&[product(repo.id)]).unwrap();
        store.set_enabled(repo.id, false).unwrap();

        let updated = Repository {
            timestamp: 200,
            ..repo.clone()
        };
        assert!(matches!(staged.commit(updated), Err(Error::Cancelled)));

        let stored = IndexStore::repository(&store, repo.id).unwrap().unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.timestamp, 100);
        assert_eq!(store.product_count(repo.id).unwrap(), 0);
    }

    #[test]
    fn test_drop_rolls_back() {
        let (store, repo) = setup();
        let lock = Mutex::new(());

        {
            let mut staged = StagedUpdate::begin(&store, &lock, &repo).unwrap();
            staged.stage(&[product(repo.id)]).unwrap();
            assert_eq!(staged.state(), CommitState::Staging);
        }

        assert_eq!(store.product_count(repo.id).unwrap(), 0);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_explicit_rollback() {
        let (store, repo) = setup();
        let lock = Mutex::new(());

        let mut staged = StagedUpdate::begin(&store, &lock, &repo).unwrap();
        staged.stage(&[product(repo.id)]).unwrap();
        staged.rollback().unwrap();

        assert_eq!(store.product_count(repo.id).unwrap(), 0);
    }
}

// src/db/mod.rs

//! Catalog database
//!
//! [`IndexStore`] is the contract the update pipeline needs from persistent
//! storage: a staging area that is invisible to readers until it is
//! finalized, and cleanup of products from repositories that were disabled
//! or removed. [`SqliteStore`] implements it on top of rusqlite.

pub mod paths;
pub mod schema;
mod store;

pub use store::SqliteStore;

use crate::error::{Error, Result};
use crate::model::{Product, Repository};
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

/// Persistent store driven by the update pipeline
pub trait IndexStore: Send + Sync {
    /// Create an empty staging area, discarding any leftover one
    fn create_staging_area(&self) -> Result<()>;

    /// Write transformed products into the staging area
    fn write_staged(&self, repository_id: i64, products: &[Product]) -> Result<()>;

    /// Conclude the staging area
    ///
    /// With `commit` set, the staged products replace the live products of
    /// `repository` and its catalog state is written, in one transaction.
    /// The user-owned columns (address, enabled, deleted) are left as
    /// stored. A repository that is no longer enabled, or is deleted, is not
    /// committed and the call fails with [`Error::Cancelled`].
    ///
    /// A successful call drops the staging area.
    fn finalize(&self, repository: &Repository, commit: bool) -> Result<()>;

    /// `(repository_id, deleted)` for every disabled or deleted repository
    fn removed_or_disabled(&self) -> Result<Vec<(i64, bool)>>;

    /// Remove products of the given repositories, and the rows of deleted ones
    fn cleanup(&self, repositories: &[(i64, bool)]) -> Result<()>;

    /// Current stored state of a repository
    fn repository(&self, id: i64) -> Result<Option<Repository>>;
}

/// Create a new database at `db_path` with the current schema
pub fn init(db_path: impl AsRef<Path>) -> Result<()> {
    let db_path = db_path.as_ref();
    info!("Initializing catalog database at {}", db_path.display());

    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::InitError(format!("Failed to create {}: {e}", parent.display()))
        })?;
    }

    let conn = open(db_path)?;
    drop(conn);
    Ok(())
}

/// Open the database at `db_path`, migrating it to the current schema
pub fn open(db_path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(db_path.as_ref())?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    schema::migrate(conn)
}

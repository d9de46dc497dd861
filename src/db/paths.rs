// src/db/paths.rs
//! Centralized path derivation for catalog-sync directories

use std::path::{Path, PathBuf};

/// Default location of the catalog database
pub const DEFAULT_DB_PATH: &str = "/var/lib/catalog-sync/catalog.db";

/// Get the directory containing the database
pub fn db_dir(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("/var/lib/catalog-sync"))
        .to_path_buf()
}

/// Get the scratch directory for downloads and merge buffers
///
/// `CATALOG_SYNC_SCRATCH_DIR` overrides the default `<db dir>/tmp`.
pub fn scratch_dir(db_path: &Path) -> PathBuf {
    std::env::var("CATALOG_SYNC_SCRATCH_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| db_dir(db_path).join("tmp"))
}

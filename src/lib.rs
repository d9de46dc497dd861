// src/lib.rs

//! catalog-sync
//!
//! Keeps a local SQLite copy of signed software catalogs in step with their
//! remote repositories.
//!
//! # Architecture
//!
//! - Pinned trust: a repository's signer certificate is pinned on first use
//!   and every later catalog must be signed by it
//! - Bounded memory: parsed records are merged through a scratch SQLite file
//! - Atomic updates: a catalog is staged and replaces the live rows in one
//!   transaction, or not at all
//! - Downgrade protection: a catalog older than the committed one is rejected

pub mod config;
pub mod db;
mod error;
pub mod index;
pub mod model;
pub mod progress;
pub mod repository;
pub mod update;

pub use config::{DeviceProfile, UpdaterConfig};
pub use db::{IndexStore, SqliteStore};
pub use error::{Error, Result, UpdateError, UpdateErrorKind};
pub use model::{Incompatibility, Product, Release, Repository, RepositoryMetadata};
pub use progress::{
    CallbackProgress, CliProgress, LogProgress, ProgressEvent, SilentProgress, UpdateProgress,
    UpdateStage,
};
pub use repository::{DownloadError, Downloader, FetchRequest, FetchResponse, HttpDownloader};
pub use update::{CancelToken, RepositoryUpdater, UpdateOutcome};

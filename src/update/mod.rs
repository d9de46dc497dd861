// src/update/mod.rs

//! Repository index update pipeline
//!
//! One update attempt runs these steps, in order:
//!
//! 1. [`fetch`]: conditional download of the index archive, with format fallback
//! 2. [`fingerprint`]: signer check against the pinned certificate fingerprint
//! 3. [`consumer`]: streaming parse into a disk-backed [`merger::MergeBuffer`]
//! 4. [`compat`]: release ranking and compatibility tagging per product
//! 5. [`commit`]: staged write and atomic commit, or rollback
//!
//! [`RepositoryUpdater`] owns the collaborators and the two locks. The update
//! lock serializes whole attempts, so scratch files and the staging area are
//! only ever touched by one attempt. The cleanup lock guards the store's
//! finalize and cleanup paths, which keeps cleanup from waiting on a merge.

pub mod cancel;
pub mod commit;
pub mod compat;
pub mod consumer;
pub mod fetch;
pub mod fingerprint;
pub mod merger;

pub use cancel::CancelToken;
pub use commit::{CommitState, StagedUpdate};
pub use fetch::{FetchCoordinator, FetchOutcome, IndexFile};

use crate::config::UpdaterConfig;
use crate::db::IndexStore;
use crate::error::{Error, Result};
use crate::index::{ArchiveOpener, IndexFormat, IndexParser, IndexV1Parser, JarOpener};
use crate::model::{Product, Repository};
use crate::progress::{UpdateProgress, UpdateStage};
use crate::repository::Downloader;
use consumer::{ParseConsumer, ProgressReader};
use merger::MergeBuffer;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Products handed from the merge buffer to the staging area at once
pub const PAGE_SIZE: usize = 50;

/// Result of [`RepositoryUpdater::update`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The remote index did not change; nothing was written
    Unchanged,
    /// A new catalog was committed
    Updated {
        repository: Repository,
        products: u64,
    },
    /// The cancel token was raised; the attempt rolled back
    Cancelled,
}

/// Runs update attempts against one store
pub struct RepositoryUpdater {
    config: UpdaterConfig,
    store: Arc<dyn IndexStore>,
    downloader: Arc<dyn Downloader>,
    opener: Arc<dyn ArchiveOpener>,
    formats: Vec<(IndexFormat, Arc<dyn IndexParser>)>,
    update_lock: Mutex<()>,
    cleanup_lock: Mutex<()>,
}

impl RepositoryUpdater {
    /// Updater reading signed `index-v1.jar` archives
    pub fn new(
        config: UpdaterConfig,
        store: Arc<dyn IndexStore>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        Self {
            config,
            store,
            downloader,
            opener: Arc::new(JarOpener),
            formats: vec![(
                IndexFormat::V1,
                Arc::new(IndexV1Parser::new()) as Arc<dyn IndexParser>,
            )],
            update_lock: Mutex::new(()),
            cleanup_lock: Mutex::new(()),
        }
    }

    /// Replace the supported formats, in priority order
    pub fn with_formats(mut self, formats: Vec<(IndexFormat, Arc<dyn IndexParser>)>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_archive_opener(mut self, opener: Arc<dyn ArchiveOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Update the catalog of `repository`
    ///
    /// Attempts are serialized: a concurrent call blocks until the running
    /// attempt has committed or rolled back. Any error leaves the live
    /// catalog unchanged.
    pub fn update(
        &self,
        repository: &Repository,
        cancel: &CancelToken,
        progress: &dyn UpdateProgress,
    ) -> Result<UpdateOutcome> {
        let _guard = self.update_lock.lock();
        let attempt_id = Uuid::new_v4().simple().to_string();
        info!(
            "Updating repository {} ({}), attempt {}",
            repository.id,
            repository.display_name(),
            attempt_id
        );

        match self.attempt(repository, cancel, progress, &attempt_id) {
            Err(Error::Cancelled) => {
                warn!("Update of repository {} cancelled", repository.id);
                Ok(UpdateOutcome::Cancelled)
            }
            Err(e) => {
                warn!("Update of repository {} failed: {}", repository.id, e);
                Err(e)
            }
            Ok(outcome) => {
                info!("Update of repository {} finished", repository.id);
                Ok(outcome)
            }
        }
    }

    fn attempt(
        &self,
        repository: &Repository,
        cancel: &CancelToken,
        progress: &dyn UpdateProgress,
        attempt_id: &str,
    ) -> Result<UpdateOutcome> {
        cancel.check()?;
        let scratch_dir = self.config.scratch_dir();
        let formats: Vec<IndexFormat> = self.formats.iter().map(|(format, _)| *format).collect();

        let outcome = FetchCoordinator::new(self.downloader.as_ref(), &scratch_dir, attempt_id)
            .fetch(repository, &formats, progress)?;
        let (file, index) = match outcome {
            FetchOutcome::Unmodified => return Ok(UpdateOutcome::Unchanged),
            FetchOutcome::Fetched { file, format } => (file, format),
        };
        let (format, parser) = &self.formats[index];
        cancel.check()?;

        let mut archive = self.opener.open(&file.path)?;
        let fingerprint =
            fingerprint::verify(archive.as_mut(), format.entry_name, &repository.fingerprint)?;

        let mut buffer = MergeBuffer::create(&scratch_dir, attempt_id)?;
        let metadata = {
            let size = archive.entry_size(format.entry_name)?;
            let entry = archive.open_entry(format.entry_name)?;
            let mut reader = ProgressReader::new(entry, Some(size), progress);
            let mut consumer = ParseConsumer::new(&mut buffer, cancel);
            parser.parse(repository.id, &mut reader, &mut consumer)?;
            consumer.finish()?
        };
        drop(archive);
        debug!(
            "Parsed {} products, catalog timestamp {}",
            buffer.count()?,
            metadata.timestamp
        );
        commit::validate_timestamp(repository.timestamp, metadata.timestamp)?;

        let mut staged = StagedUpdate::begin(self.store.as_ref(), &self.cleanup_lock, repository)?;
        let device = &self.config.device;
        let unstable = self.config.unstable;
        let mut emitted = 0u64;
        buffer.drain(repository.id, PAGE_SIZE, |page, total| {
            cancel.check()?;
            let page: Vec<Product> = page
                .into_iter()
                .map(|product| compat::transform_product(product, device, unstable))
                .collect();
            staged.stage(&page)?;
            emitted += page.len() as u64;
            debug!("Staged {}/{} products", emitted, total);
            progress.report(UpdateStage::Merge, emitted, Some(total));
            Ok(())
        })?;
        cancel.check()?;

        progress.report(UpdateStage::Commit, 0, Some(1));
        let updated = repository
            .with_metadata(metadata)
            .with_fingerprint(fingerprint)
            .with_cache_tokens(&file.last_modified, &file.entity_tag)
            .with_updated(chrono::Utc::now().timestamp_millis());
        let repository = staged.commit(updated)?;
        progress.report(UpdateStage::Commit, 1, Some(1));

        Ok(UpdateOutcome::Updated {
            repository,
            products: emitted,
        })
    }

    /// Remove products of disabled repositories and rows of deleted ones
    ///
    /// Returns how many repositories were cleaned. Only the cleanup lock is
    /// taken, so this does not wait for a running merge.
    pub fn cleanup_removed(&self) -> Result<usize> {
        let _guard = self.cleanup_lock.lock();
        let repositories = self.store.removed_or_disabled()?;
        if repositories.is_empty() {
            return Ok(0);
        }
        self.store.cleanup(&repositories)?;
        info!("Cleaned up {} repositories", repositories.len());
        Ok(repositories.len())
    }

    /// Block until no update attempt is running
    pub fn await_idle(&self) {
        drop(self.update_lock.lock());
    }
}

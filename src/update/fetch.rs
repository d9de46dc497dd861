// src/update/fetch.rs

//! Conditional fetch of a repository index with format fallback

use crate::error::{Result, UpdateError};
use crate::index::IndexFormat;
use crate::model::Repository;
use crate::progress::{UpdateProgress, UpdateStage};
use crate::repository::{DownloadError, Downloader, FetchRequest};
use std::path::Path;
use tempfile::{Builder, TempPath};
use tracing::{debug, warn};
use url::Url;

/// A downloaded index archive
///
/// The file is removed when the value is dropped.
#[derive(Debug)]
pub struct IndexFile {
    pub path: TempPath,
    pub status: u16,
    pub last_modified: String,
    pub entity_tag: String,
}

/// Result of a fetch attempt
#[derive(Debug)]
pub enum FetchOutcome {
    /// The remote index is unchanged since the cached tokens
    Unmodified,
    /// New content; `format` indexes the format list passed to [`FetchCoordinator::fetch`]
    Fetched { file: IndexFile, format: usize },
}

/// Drives a [`Downloader`] across the supported index formats
pub struct FetchCoordinator<'a> {
    downloader: &'a dyn Downloader,
    scratch_dir: &'a Path,
    attempt_id: &'a str,
}

impl<'a> FetchCoordinator<'a> {
    pub fn new(downloader: &'a dyn Downloader, scratch_dir: &'a Path, attempt_id: &'a str) -> Self {
        Self {
            downloader,
            scratch_dir,
            attempt_id,
        }
    }

    /// Fetch the first available format of `repository`'s index
    ///
    /// Formats are tried in order; only a 404 moves on to the next one.
    pub fn fetch(
        &self,
        repository: &Repository,
        formats: &[IndexFormat],
        progress: &dyn UpdateProgress,
    ) -> Result<FetchOutcome> {
        std::fs::create_dir_all(self.scratch_dir)?;

        for (i, format) in formats.iter().enumerate() {
            let url = index_url(&repository.address, format.file_name)?;
            let path = Builder::new()
                .prefix(&format!("index-{}-", self.attempt_id))
                .suffix(".jar")
                .tempfile_in(self.scratch_dir)?
                .into_temp_path();

            let request = FetchRequest {
                url: url.as_str(),
                last_modified: non_empty(&repository.last_modified),
                entity_tag: non_empty(&repository.entity_tag),
            };
            let mut report = |read: u64, total: Option<u64>| {
                progress.report(UpdateStage::Download, read, total);
            };

            match self.downloader.fetch(&request, &path, &mut report) {
                Ok(response) => {
                    let unchanged = response.is_not_modified()
                        || (!repository.entity_tag.is_empty()
                            && response.entity_tag == repository.entity_tag);
                    if unchanged {
                        debug!("{} is unmodified (status {})", url, response.status);
                        return Ok(FetchOutcome::Unmodified);
                    }

                    debug!("Fetched {} (status {})", url, response.status);
                    return Ok(FetchOutcome::Fetched {
                        file: IndexFile {
                            path,
                            status: response.status,
                            last_modified: response.last_modified,
                            entity_tag: response.entity_tag,
                        },
                        format: i,
                    });
                }
                Err(DownloadError::Http(404)) if i + 1 < formats.len() => {
                    warn!("{} not found, falling back to {}", url, formats[i + 1].file_name);
                }
                Err(e) => return Err(classify(e).into()),
            }
        }

        Err(UpdateError::validation("No index formats configured").into())
    }
}

/// `{address}/{file_name}`, with the address treated as a directory
pub fn index_url(address: &str, file_name: &str) -> Result<Url> {
    let mut base = Url::parse(address.trim()).map_err(|e| {
        UpdateError::network(format!("Invalid repository address {address}")).with_source(e)
    })?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(file_name).map_err(|e| {
        UpdateError::network(format!("Invalid index location {file_name}")).with_source(e).into()
    })
}

fn classify(e: DownloadError) -> UpdateError {
    match e {
        DownloadError::Http(status) => UpdateError::http_status(status),
        other => UpdateError::network(other.to_string()).with_source(other),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

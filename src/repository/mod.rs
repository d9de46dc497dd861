// src/repository/mod.rs

//! Download transport for repository indexes
//!
//! The update pipeline never talks HTTP itself. It asks a [`Downloader`] to
//! write the index archive to a local path and gets back the response status
//! and cache tokens, or a typed [`DownloadError`]. [`HttpDownloader`] is the
//! reqwest-based implementation.

mod client;

pub use client::HttpDownloader;

use std::path::Path;
use thiserror::Error;

/// A conditional fetch request
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    /// Sent as `If-Modified-Since` when present
    pub last_modified: Option<&'a str>,
    /// Sent as `If-None-Match` when present
    pub entity_tag: Option<&'a str>,
}

/// Response metadata of a completed fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub last_modified: String,
    pub entity_tag: String,
}

impl FetchResponse {
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }
}

/// Transport failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Http(u16),

    #[error("connection timed out")]
    ConnectionTimeout,

    #[error("socket timed out")]
    SocketTimeout,
}

/// Writes a remote file to a local path
///
/// When `target` already has content the implementation may resume the
/// transfer with a byte-range request. `progress` receives
/// `(bytes read, total bytes if known)`.
pub trait Downloader: Send + Sync {
    fn fetch(
        &self,
        request: &FetchRequest<'_>,
        target: &Path,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> std::result::Result<FetchResponse, DownloadError>;
}

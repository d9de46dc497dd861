// src/repository/client.rs

//! HTTP downloader for index archives
//!
//! Wraps a blocking reqwest client with conditional GET, byte-range resume
//! and retry of transient connection failures.

use super::{DownloadError, Downloader, FetchRequest, FetchResponse};
use crate::error::{Error, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::{self, HeaderMap};
use reqwest::StatusCode;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for establishing a connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum attempts for failed connections
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// reqwest-based [`Downloader`]
pub struct HttpDownloader {
    client: Client,
    max_retries: u32,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("catalog-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    fn send(&self, request: &FetchRequest<'_>, resume_from: u64) -> std::result::Result<Response, DownloadError> {
        let mut builder = self.client.get(request.url);
        if let Some(last_modified) = request.last_modified {
            builder = builder.header(header::IF_MODIFIED_SINCE, last_modified);
        }
        if let Some(entity_tag) = request.entity_tag {
            builder = builder.header(header::IF_NONE_MATCH, entity_tag);
        }
        if resume_from > 0 {
            builder = builder.header(header::RANGE, format!("bytes={resume_from}-"));
        }
        builder.send().map_err(classify)
    }

    fn attempt(
        &self,
        request: &FetchRequest<'_>,
        target: &Path,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> std::result::Result<FetchResponse, DownloadError> {
        let existing = target.metadata().map(|m| m.len()).unwrap_or(0);
        let mut response = self.send(request, existing)?;
        let status = response.status();

        let tokens = FetchResponse {
            status: status.as_u16(),
            last_modified: header_value(response.headers(), header::LAST_MODIFIED),
            entity_tag: header_value(response.headers(), header::ETAG),
        };

        if status == StatusCode::NOT_MODIFIED {
            debug!("{} not modified", request.url);
            return Ok(tokens);
        }
        if !status.is_success() {
            return Err(DownloadError::Http(status.as_u16()));
        }

        // 206 continues the partial file, anything else rewrites it
        let (mut file, start) = if status == StatusCode::PARTIAL_CONTENT && existing > 0 {
            debug!("Resuming {} from byte {}", request.url, existing);
            (open_append(target)?, existing)
        } else {
            (File::create(target).map_err(io_error)?, 0)
        };
        let total = response.content_length().map(|len| len + start);

        stream_response_to_file(&mut response, &mut file, start, total, progress)?;
        file.sync_all().map_err(io_error)?;

        Ok(tokens)
    }
}

impl Downloader for HttpDownloader {
    fn fetch(
        &self,
        request: &FetchRequest<'_>,
        target: &Path,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> std::result::Result<FetchResponse, DownloadError> {
        info!("Downloading {} to {}", request.url, target.display());

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(request, target, progress) {
                Err(e) if is_transient(&e) && attempt < self.max_retries => {
                    warn!("Download attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
                other => return other,
            }
        }
    }
}

/// Stream the body to `file`, never buffering the whole response
fn stream_response_to_file(
    response: &mut Response,
    file: &mut File,
    start: u64,
    total: Option<u64>,
    progress: &mut dyn FnMut(u64, Option<u64>),
) -> std::result::Result<u64, DownloadError> {
    let mut downloaded = start;
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];
    progress(downloaded, total);

    loop {
        let bytes_read = response.read(&mut buffer).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                DownloadError::SocketTimeout
            } else {
                DownloadError::Network(format!("Failed to read response: {e}"))
            }
        })?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read]).map_err(io_error)?;
        downloaded += bytes_read as u64;
        progress(downloaded, total);
    }

    Ok(downloaded)
}

fn open_append(path: &Path) -> std::result::Result<File, DownloadError> {
    OpenOptions::new().append(true).open(path).map_err(io_error)
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn classify(e: reqwest::Error) -> DownloadError {
    if e.is_timeout() {
        if e.is_connect() {
            DownloadError::ConnectionTimeout
        } else {
            DownloadError::SocketTimeout
        }
    } else {
        DownloadError::Network(e.to_string())
    }
}

/// Status codes are final, everything else may succeed on another attempt
fn is_transient(e: &DownloadError) -> bool {
    !matches!(e, DownloadError::Http(_))
}

fn io_error(e: std::io::Error) -> DownloadError {
    DownloadError::Network(format!("Failed to write downloaded data: {e}"))
}

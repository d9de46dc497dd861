// src/update/consumer.rs

//! Parser sink feeding the merge buffer

use super::cancel::CancelToken;
use super::merger::MergeBuffer;
use crate::error::{Result, UpdateError};
use crate::index::IndexSink;
use crate::model::{Product, Release, RepositoryMetadata};
use crate::progress::{UpdateProgress, UpdateStage};
use std::io::{self, Read};
use tracing::debug;

/// Records buffered in memory before a flush into the merge buffer
pub const BATCH_SIZE: usize = 50;

/// [`IndexSink`] that batches parsed records into a [`MergeBuffer`]
pub struct ParseConsumer<'a> {
    buffer: &'a mut MergeBuffer,
    cancel: &'a CancelToken,
    metadata: Option<RepositoryMetadata>,
    products: Vec<Product>,
    releases: Vec<(String, Vec<Release>)>,
}

impl<'a> ParseConsumer<'a> {
    pub fn new(buffer: &'a mut MergeBuffer, cancel: &'a CancelToken) -> Self {
        Self {
            buffer,
            cancel,
            metadata: None,
            products: Vec::with_capacity(BATCH_SIZE),
            releases: Vec::with_capacity(BATCH_SIZE),
        }
    }

    fn flush_products(&mut self) -> Result<()> {
        if !self.products.is_empty() {
            debug!("Flushing {} products", self.products.len());
            self.buffer.add_products(&self.products)?;
            self.products.clear();
        }
        Ok(())
    }

    fn flush_releases(&mut self) -> Result<()> {
        if !self.releases.is_empty() {
            debug!("Flushing {} release lists", self.releases.len());
            self.buffer.add_releases(&self.releases)?;
            self.releases.clear();
        }
        Ok(())
    }

    /// Flush what is left and return the catalog's repository metadata
    ///
    /// Fails with a parse error when the stream had no repository section.
    pub fn finish(mut self) -> Result<RepositoryMetadata> {
        self.cancel.check()?;
        self.flush_products()?;
        self.flush_releases()?;
        self.metadata
            .take()
            .ok_or_else(|| UpdateError::parse("Catalog has no repository section").into())
    }
}

impl IndexSink for ParseConsumer<'_> {
    fn on_repository(&mut self, metadata: RepositoryMetadata) -> Result<()> {
        self.cancel.check()?;
        if self.metadata.is_some() {
            return Err(UpdateError::parse("Catalog has more than one repository section").into());
        }
        self.metadata = Some(metadata);
        Ok(())
    }

    fn on_product(&mut self, product: Product) -> Result<()> {
        self.cancel.check()?;
        self.products.push(product);
        if self.products.len() >= BATCH_SIZE {
            self.flush_products()?;
        }
        Ok(())
    }

    fn on_releases(&mut self, package_name: String, releases: Vec<Release>) -> Result<()> {
        self.cancel.check()?;
        self.releases.push((package_name, releases));
        if self.releases.len() >= BATCH_SIZE {
            self.flush_releases()?;
        }
        Ok(())
    }
}

/// Reader that reports bytes consumed as `Process` progress
pub struct ProgressReader<'a, R> {
    inner: R,
    read: u64,
    total: Option<u64>,
    progress: &'a dyn UpdateProgress,
}

impl<'a, R: Read> ProgressReader<'a, R> {
    pub fn new(inner: R, total: Option<u64>, progress: &'a dyn UpdateProgress) -> Self {
        Self {
            inner,
            read: 0,
            total,
            progress,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.read += n as u64;
            self.progress.report(UpdateStage::Process, self.read, self.total);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, UpdateErrorKind};
    use crate::progress::{CallbackProgress, ProgressEvent};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn product(i: usize) -> Product {
        Product {
            package_name: format!("p{i}"),
            ..Default::default()
        }
    }

    #[test]
    fn test_batches_and_final_flush() {
        let dir = TempDir::new().unwrap();
        let mut buffer = MergeBuffer::create(dir.path(), "t").unwrap();
        let cancel = CancelToken::new();

        let mut consumer = ParseConsumer::new(&mut buffer, &cancel);
        consumer.on_repository(RepositoryMetadata::default()).unwrap();
        for i in 0..(BATCH_SIZE + 1) {
            consumer.on_product(product(i)).unwrap();
        }
        assert!(consumer.products.len() == 1);
        consumer.on_releases("p0".to_string(), vec![]).unwrap();

        let metadata = consumer.finish().unwrap();
        assert_eq!(metadata, RepositoryMetadata::default());
        assert_eq!(buffer.count().unwrap(), (BATCH_SIZE + 1) as u64);
    }

    #[test]
    fn test_missing_repository_section() {
        let dir = TempDir::new().unwrap();
        let mut buffer = MergeBuffer::create(dir.path(), "t").unwrap();
        let cancel = CancelToken::new();

        let consumer = ParseConsumer::new(&mut buffer, &cancel);
        let err = consumer.finish().unwrap_err();
        assert_eq!(err.update_kind(), Some(UpdateErrorKind::Parse));
    }

    #[test]
    fn test_second_repository_section_rejected() {
        let dir = TempDir::new().unwrap();
        let mut buffer = MergeBuffer::create(dir.path(), "t").unwrap();
        let cancel = CancelToken::new();

        let mut consumer = ParseConsumer::new(&mut buffer, &cancel);
        consumer.on_repository(RepositoryMetadata::default()).unwrap();
        let err = consumer
            .on_repository(RepositoryMetadata::default())
            .unwrap_err();
        assert_eq!(err.update_kind(), Some(UpdateErrorKind::Parse));
    }

    #[test]
    fn test_cancel_stops_consumption() {
        let dir = TempDir::new().unwrap();
        let mut buffer = MergeBuffer::create(dir.path(), "t").unwrap();
        let cancel = CancelToken::new();

        let mut consumer = ParseConsumer::new(&mut buffer, &cancel);
        consumer.on_product(product(0)).unwrap();
        cancel.cancel();
        assert!(matches!(consumer.on_product(product(1)), Err(Error::Cancelled)));
    }

    #[test]
    fn test_progress_reader_counts_bytes() {
        let events = Mutex::new(Vec::new());
        let progress = CallbackProgress::new(|e: ProgressEvent| events.lock().unwrap().push(e));

        let mut reader = ProgressReader::new(&b"hello world"[..], Some(11), &progress);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(reader.bytes_read(), 11);
        let events = events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.stage, UpdateStage::Process);
        assert_eq!((last.current, last.total), (11, Some(11)));
    }
}

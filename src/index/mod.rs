// src/index/mod.rs

//! Catalog formats and the collaborators that read them
//!
//! - [`IndexFormat`]: file layout of a published index (archive + entry)
//! - [`IndexSink`] / [`IndexParser`]: push-style parser contract
//! - [`archive`]: signed archive access and signer extraction
//! - [`v1`]: streaming parser for `index-v1.json`

pub mod archive;
pub mod v1;

use crate::error::Result;
use crate::model::{Product, Release, RepositoryMetadata};
use std::io::Read;

pub use archive::{ArchiveOpener, JarArchive, JarOpener, SignedArchive, Signer};
pub use v1::IndexV1Parser;

/// Layout of a published index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFormat {
    /// Archive file name relative to the repository address
    pub file_name: &'static str,
    /// Archive entry holding the catalog payload
    pub entry_name: &'static str,
}

impl IndexFormat {
    pub const V1: IndexFormat = IndexFormat {
        file_name: "index-v1.jar",
        entry_name: "index-v1.json",
    };
}

/// Receiver of parsed catalog records
///
/// Parsers call `on_repository` once and then `on_product` / `on_releases`
/// any number of times, interleaved, in archive order. An error returned
/// from any callback aborts the parse and is returned from
/// [`IndexParser::parse`] unchanged.
pub trait IndexSink {
    fn on_repository(&mut self, metadata: RepositoryMetadata) -> Result<()>;

    fn on_product(&mut self, product: Product) -> Result<()>;

    fn on_releases(&mut self, package_name: String, releases: Vec<Release>) -> Result<()>;
}

/// Streaming catalog parser
pub trait IndexParser: Send + Sync {
    /// Parse `reader` and push every record into `sink`
    ///
    /// Products are tagged with `repository_id`. Undecodable input fails with
    /// an update error of kind `Parse`.
    fn parse(&self, repository_id: i64, reader: &mut dyn Read, sink: &mut dyn IndexSink)
    -> Result<()>;
}

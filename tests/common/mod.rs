// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! - [`ScriptedDownloader`]: answers fetches per URL from a script
//! - [`FakeOpener`]: treats the downloaded file as the raw catalog entry and
//!   reports configurable signers
//! - [`RecordingStore`]: wraps a [`SqliteStore`], logs staging calls and can
//!   fail a chosen write
//! - [`Harness`]: an updater wired to all three in a temporary directory

#![allow(dead_code)]

use catalog_sync::db::IndexStore;
use catalog_sync::index::{ArchiveOpener, SignedArchive, Signer};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use catalog_sync::update::fingerprint::certificate_fingerprint;
use catalog_sync::{
    DeviceProfile, DownloadError, Downloader, Error, FetchRequest, FetchResponse, Product,
    Repository, RepositoryUpdater, Result, SqliteStore, UpdaterConfig,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const CERT_A: &[u8] = b"certificate A";
pub const CERT_B: &[u8] = b"certificate B";

pub fn fingerprint_of(cert: &[u8]) -> String {
    certificate_fingerprint(cert)
}

/// A signer with a single certificate
pub fn signer(cert: &[u8]) -> Signer {
    Signer {
        certificates: vec![cert.to_vec()],
    }
}

/// index-v1 document with `count` products, each with releases 1 and 2
pub fn catalog(timestamp: i64, count: usize) -> Vec<u8> {
    let apps: Vec<_> = (0..count)
        .map(|i| {
            json!({
                "packageName": format!("org.example.app{i:03}"),
                "name": format!("App {i}"),
                "summary": "An example app",
                "categories": ["Tools"],
                "suggestedVersionCode": 2
            })
        })
        .collect();
    let packages: serde_json::Map<String, serde_json::Value> = (0..count)
        .map(|i| {
            (
                format!("org.example.app{i:03}"),
                json!([
                    { "versionCode": 1, "versionName": "1.0", "hash": format!("a{i}") },
                    { "versionCode": 2, "versionName": "2.0", "hash": format!("b{i}") }
                ]),
            )
        })
        .collect();

    serde_json::to_vec(&json!({
        "repo": {
            "name": "Example",
            "description": "Example repository",
            "version": 21,
            "timestamp": timestamp
        },
        "apps": apps,
        "packages": packages
    }))
    .unwrap()
}

/// Scripted answer to one fetch
#[derive(Clone)]
pub enum Reply {
    Content { body: Vec<u8>, entity_tag: String },
    NotModified,
    Fail(DownloadError),
}

impl Reply {
    pub fn content(body: Vec<u8>, entity_tag: &str) -> Self {
        Reply::Content {
            body,
            entity_tag: entity_tag.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: String,
    pub entity_tag: Option<String>,
}

/// Downloader answering from per-URL queues
#[derive(Default)]
pub struct ScriptedDownloader {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    pub requests: Mutex<Vec<RecordedRequest>>,
    /// Delay before each reply, to widen race windows
    pub delay: Mutex<Option<Duration>>,
}

impl ScriptedDownloader {
    pub fn push(&self, url: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Downloader for ScriptedDownloader {
    fn fetch(
        &self,
        request: &FetchRequest<'_>,
        target: &Path,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> std::result::Result<FetchResponse, DownloadError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: request.url.to_string(),
            entity_tag: request.entity_tag.map(String::from),
        });
        if let Some(delay) = *self.delay.lock().unwrap() {
            std::thread::sleep(delay);
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(request.url)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Reply::Fail(DownloadError::Http(404)));

        match reply {
            Reply::Content { body, entity_tag } => {
                std::fs::write(target, &body).unwrap();
                progress(body.len() as u64, Some(body.len() as u64));
                Ok(FetchResponse {
                    status: 200,
                    last_modified: "Tue, 01 Oct 2024 00:00:00 GMT".to_string(),
                    entity_tag,
                })
            }
            Reply::NotModified => Ok(FetchResponse {
                status: 304,
                ..Default::default()
            }),
            Reply::Fail(e) => Err(e),
        }
    }
}

/// Opener whose archives hold the downloaded bytes as their only entry
#[derive(Default)]
pub struct FakeOpener {
    pub signers: Mutex<Vec<Signer>>,
    pub opened: Mutex<Vec<PathBuf>>,
}

impl FakeOpener {
    pub fn set_signers(&self, signers: Vec<Signer>) {
        *self.signers.lock().unwrap() = signers;
    }
}

struct FakeArchive {
    content: Vec<u8>,
    signers: Vec<Signer>,
}

impl SignedArchive for FakeArchive {
    fn entry_size(&mut self, _name: &str) -> Result<u64> {
        Ok(self.content.len() as u64)
    }

    fn open_entry(&mut self, _name: &str) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(Cursor::new(self.content.as_slice())))
    }

    fn signers(&mut self, _name: &str) -> Result<Vec<Signer>> {
        Ok(self.signers.clone())
    }
}

impl ArchiveOpener for FakeOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn SignedArchive>> {
        self.opened.lock().unwrap().push(path.to_path_buf());
        Ok(Box::new(FakeArchive {
            content: std::fs::read(path)?,
            signers: self.signers.lock().unwrap().clone(),
        }))
    }
}

/// Staging call observed by [`RecordingStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Begin,
    Write { repository_id: i64, count: usize },
    Finalize { repository_id: i64, commit: bool },
}

/// [`SqliteStore`] wrapper logging staging calls
pub struct RecordingStore {
    pub inner: SqliteStore,
    pub events: Mutex<Vec<StoreEvent>>,
    /// Fail the n-th `write_staged` call (0-based)
    pub fail_write: Mutex<Option<usize>>,
    writes: Mutex<usize>,
}

impl RecordingStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            events: Mutex::new(Vec::new()),
            fail_write: Mutex::new(None),
            writes: Mutex::new(0),
        }
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl IndexStore for RecordingStore {
    fn create_staging_area(&self) -> Result<()> {
        self.events.lock().unwrap().push(StoreEvent::Begin);
        self.inner.create_staging_area()
    }

    fn write_staged(&self, repository_id: i64, products: &[Product]) -> Result<()> {
        let n = {
            let mut writes = self.writes.lock().unwrap();
            *writes += 1;
            *writes - 1
        };
        if *self.fail_write.lock().unwrap() == Some(n) {
            return Err(Error::IoError("disk full".to_string()));
        }
        self.events.lock().unwrap().push(StoreEvent::Write {
            repository_id,
            count: products.len(),
        });
        self.inner.write_staged(repository_id, products)
    }

    fn finalize(&self, repository: &Repository, commit: bool) -> Result<()> {
        self.events.lock().unwrap().push(StoreEvent::Finalize {
            repository_id: repository.id,
            commit,
        });
        self.inner.finalize(repository, commit)
    }

    fn removed_or_disabled(&self) -> Result<Vec<(i64, bool)>> {
        self.inner.removed_or_disabled()
    }

    fn cleanup(&self, repositories: &[(i64, bool)]) -> Result<()> {
        self.inner.cleanup(repositories)
    }

    fn repository(&self, id: i64) -> Result<Option<Repository>> {
        self.inner.repository(id)
    }
}

/// Updater wired to the fakes inside a temporary directory
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<RecordingStore>,
    pub downloader: Arc<ScriptedDownloader>,
    pub opener: Arc<FakeOpener>,
    pub updater: RepositoryUpdater,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut UpdaterConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = UpdaterConfig::new(dir.path().join("catalog.db"));
        config.scratch_dir = Some(dir.path().join("scratch"));
        config.device = DeviceProfile {
            platform_version: 34,
            platforms: vec!["arm64-v8a".to_string()],
            features: BTreeSet::new(),
        };
        adjust(&mut config);

        let store = Arc::new(RecordingStore::new(
            SqliteStore::open(&config.db_path).unwrap(),
        ));
        let downloader = Arc::new(ScriptedDownloader::default());
        let opener = Arc::new(FakeOpener::default());
        opener.set_signers(vec![signer(CERT_A)]);

        let updater = RepositoryUpdater::new(config, store.clone(), downloader.clone())
            .with_archive_opener(opener.clone());

        Self {
            dir,
            store,
            downloader,
            opener,
            updater,
        }
    }

    /// Updater over the same store and downloader that opens real JARs
    pub fn jar_updater(&self) -> RepositoryUpdater {
        RepositoryUpdater::new(
            self.updater.config().clone(),
            self.store.clone(),
            self.downloader.clone(),
        )
    }

    /// Insert a repository at `address`
    pub fn add_repository(&self, address: &str) -> Repository {
        self.store
            .inner
            .add_repository(&Repository::new(address))
            .unwrap()
    }

    /// Stored state of a repository
    pub fn stored(&self, id: i64) -> Repository {
        self.store.repository(id).unwrap().unwrap()
    }

    /// Files left behind in the scratch directory
    pub fn scratch_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.dir.path().join("scratch")) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Catalog of the signed JAR fixture, timestamp 1700000000000, no products
pub const JAR_CATALOG: &[u8] = include_bytes!("../../src/index/testdata/index-v1.json");
pub const JAR_MANIFEST: &[u8] = include_bytes!("../../src/index/testdata/MANIFEST.MF");
const JAR_SIGNATURE_FILE: &[u8] = include_bytes!("../../src/index/testdata/SIGNER.SF");
const JAR_SIGNATURE_BLOCK: &[u8] = include_bytes!("../../src/index/testdata/rsa.RSA");
/// Certificate that signed the JAR fixture
pub const JAR_SIGNER_CERT: &[u8] = include_bytes!("../../src/index/testdata/rsa.der");

/// Manifest listing `entry` with the SHA-256 of `content`
pub fn manifest_for(entry: &str, content: &[u8]) -> Vec<u8> {
    let digest = BASE64.encode(Sha256::digest(content));
    format!("Manifest-Version: 1.0\r\n\r\nName: {entry}\r\nSHA-256-Digest: {digest}\r\n\r\n")
        .into_bytes()
}

/// `index-v1.jar` bytes carrying the fixture signature over `manifest`
pub fn signed_jar(manifest: &[u8], catalog: &[u8]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in [
        ("META-INF/MANIFEST.MF", manifest),
        ("META-INF/SIGNER.SF", JAR_SIGNATURE_FILE),
        ("META-INF/SIGNER.RSA", JAR_SIGNATURE_BLOCK),
        ("index-v1.json", catalog),
    ] {
        writer
            .start_file(name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Index URL of a repository address
pub fn index_url(address: &str) -> String {
    format!("{}/index-v1.jar", address.trim_end_matches('/'))
}

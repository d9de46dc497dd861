// src/config.rs
//! Updater configuration
//!
//! Configuration is optional: every field has a default, and a TOML file
//! only needs to name what it changes.
//!
//! ```toml
//! db_path = "/var/lib/catalog-sync/catalog.db"
//! unstable = false
//!
//! [device]
//! platform_version = 34
//! platforms = ["arm64-v8a", "armeabi-v7a"]
//! features = ["android.hardware.camera", "android.hardware.wifi"]
//! ```

use crate::db::paths;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Capabilities of the device releases are checked against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    /// Platform version (API level) of the running device
    pub platform_version: i32,
    /// ABIs the device can execute, in preference order
    pub platforms: Vec<String>,
    /// Hardware and software features the device declares
    pub features: BTreeSet<String>,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::host()
    }
}

impl DeviceProfile {
    /// Latest platform version assumed when nothing is configured
    pub const DEFAULT_PLATFORM_VERSION: i32 = 34;

    /// Profile derived from the host architecture
    pub fn host() -> Self {
        let platforms = match std::env::consts::ARCH {
            "aarch64" => vec!["arm64-v8a", "armeabi-v7a", "armeabi"],
            "arm" => vec!["armeabi-v7a", "armeabi"],
            "x86_64" => vec!["x86_64", "x86"],
            "x86" => vec!["x86"],
            other => vec![other],
        };

        Self {
            platform_version: Self::DEFAULT_PLATFORM_VERSION,
            platforms: platforms.into_iter().map(String::from).collect(),
            features: BTreeSet::new(),
        }
    }
}

/// Configuration of a [`crate::RepositoryUpdater`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Path to the catalog database
    pub db_path: PathBuf,
    /// Directory for downloaded archives and merge buffers
    pub scratch_dir: Option<PathBuf>,
    /// Accept releases newer than the publisher's suggested version
    pub unstable: bool,
    pub device: DeviceProfile,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(paths::DEFAULT_DB_PATH),
            scratch_dir: None,
            unstable: false,
            device: DeviceProfile::default(),
        }
    }
}

impl UpdaterConfig {
    /// Configuration for a database at `db_path`, other fields default
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigError(format!("Invalid configuration: {e}")))
    }

    /// Effective scratch directory
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| paths::scratch_dir(&self.db_path))
    }
}

// src/model/product.rs

//! Product and Release models - packages listed by a catalog

use serde::{Deserialize, Serialize};

/// A distributable package and its releases
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub repository_id: i64,
    pub package_name: String,
    pub name: String,
    pub summary: String,
    pub description: String,
    pub whats_new: String,
    pub icon: String,
    pub author: String,
    pub license: String,
    pub source: String,
    pub web: String,
    pub tracker: String,
    pub changelog: String,
    pub added: i64,
    pub updated: i64,
    /// Version code the publisher recommends; 0 means no suggestion
    pub suggested_version_code: i64,
    pub categories: Vec<String>,
    pub anti_features: Vec<String>,
    pub donates: Vec<String>,
    pub screenshots: Vec<String>,
    pub releases: Vec<Release>,
}

impl Product {
    /// The release marked as selected, if any
    pub fn selected_release(&self) -> Option<&Release> {
        self.releases.iter().find(|r| r.selected)
    }

    /// True when the selected release has no incompatibilities
    pub fn is_compatible(&self) -> bool {
        self.selected_release().is_some_and(Release::is_compatible)
    }
}

/// One distributable artifact of a product
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub selected: bool,
    pub version: String,
    pub version_code: i64,
    pub added: i64,
    pub size: i64,
    /// Lowest supported platform version; 0 means unbounded
    pub min_platform_version: i32,
    pub target_platform_version: i32,
    /// Highest supported platform version; 0 means unbounded
    pub max_platform_version: i32,
    pub source: String,
    /// Artifact file name relative to the repository address
    pub release: String,
    pub hash: String,
    pub hash_type: String,
    /// Expected signing certificate hash of the artifact
    pub signature: String,
    pub permissions: Vec<String>,
    pub features: Vec<String>,
    /// Supported ABIs; empty means any
    pub platforms: Vec<String>,
    pub incompatibilities: Vec<Incompatibility>,
}

impl Release {
    /// Identity used for de-duplication within a product
    pub fn identifier(&self) -> String {
        format!("{}.{}", self.version_code, self.hash)
    }

    pub fn is_compatible(&self) -> bool {
        self.incompatibilities.is_empty()
    }
}

/// Reason a release cannot run on the current device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "feature", rename_all = "snake_case")]
pub enum Incompatibility {
    /// Device platform is older than the release's floor
    MinPlatform,
    /// Device platform is newer than the release's ceiling
    MaxPlatform,
    /// None of the release's ABIs run on the device
    Platform,
    /// A required feature is missing on the device
    Feature(String),
}

impl std::fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Incompatibility::MinPlatform => write!(f, "platform too old"),
            Incompatibility::MaxPlatform => write!(f, "platform too new"),
            Incompatibility::Platform => write!(f, "unsupported ABI"),
            Incompatibility::Feature(feature) => write!(f, "missing feature {feature}"),
        }
    }
}

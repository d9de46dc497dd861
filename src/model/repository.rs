// src/model/repository.rs

//! Repository - a remote catalog source and its trust/caching state

use serde::{Deserialize, Serialize};

/// A remote repository publishing a signed catalog
///
/// Values are never mutated in place by the update pipeline. Each stage
/// derives a new copy, and only the commit step persists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub address: String,
    pub mirrors: Vec<String>,
    pub name: String,
    pub description: String,
    /// Index format version reported by the catalog
    pub version: i32,
    pub enabled: bool,
    pub deleted: bool,
    /// Pinned signer fingerprint (uppercase hex), empty until first update
    pub fingerprint: String,
    pub last_modified: String,
    pub entity_tag: String,
    /// Wall-clock millis of the last successful update
    pub updated: i64,
    /// Catalog timestamp in millis, never decreases
    pub timestamp: i64,
}

/// Repository-level fields reported once per catalog by the parser
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub mirrors: Vec<String>,
    pub name: String,
    pub description: String,
    pub version: i32,
    pub timestamp: i64,
}

impl Repository {
    /// Create a new, enabled repository with no pinned fingerprint
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            id: 0,
            address: address.into(),
            mirrors: Vec::new(),
            name: String::new(),
            description: String::new(),
            version: 0,
            enabled: true,
            deleted: false,
            fingerprint: String::new(),
            last_modified: String::new(),
            entity_tag: String::new(),
            updated: 0,
            timestamp: 0,
        }
    }

    /// Create a repository with a fingerprint pinned up front
    pub fn with_pinned(address: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            ..Self::new(address)
        }
    }

    /// Copy with the catalog's repository metadata applied
    pub fn with_metadata(&self, metadata: RepositoryMetadata) -> Self {
        Self {
            mirrors: metadata.mirrors,
            name: metadata.name,
            description: metadata.description,
            version: metadata.version,
            timestamp: metadata.timestamp,
            ..self.clone()
        }
    }

    /// Copy with new conditional-fetch cache tokens
    pub fn with_cache_tokens(&self, last_modified: &str, entity_tag: &str) -> Self {
        Self {
            last_modified: last_modified.to_string(),
            entity_tag: entity_tag.to_string(),
            ..self.clone()
        }
    }

    pub fn with_fingerprint(&self, fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            ..self.clone()
        }
    }

    pub fn with_updated(&self, updated: i64) -> Self {
        Self {
            updated,
            ..self.clone()
        }
    }

    /// Copy with the enabled flag changed
    ///
    /// Cache tokens are cleared either way, so the next update after
    /// re-enabling always fetches the full catalog.
    pub fn enable(&self, enabled: bool) -> Self {
        Self {
            enabled,
            last_modified: String::new(),
            entity_tag: String::new(),
            ..self.clone()
        }
    }

    /// Copy with the pinned fingerprint removed
    ///
    /// The next successful update pins whatever signer it sees.
    pub fn reset_fingerprint(&self) -> Self {
        Self {
            fingerprint: String::new(),
            ..self.clone()
        }
    }

    /// Display name, falling back to the address when the catalog has not named it yet
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.address
        } else {
            &self.name
        }
    }
}

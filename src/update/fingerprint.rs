// src/update/fingerprint.rs

//! Signer fingerprint extraction and pinning
//!
//! A catalog entry is trusted only when it has exactly one signer whose
//! certificate path holds exactly one certificate. The fingerprint of that
//! certificate is pinned on the first successful update and must match on
//! every later one.

use crate::error::{Result, UpdateError};
use crate::index::SignedArchive;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Uppercase hex SHA-256 of a DER-encoded certificate
pub fn certificate_fingerprint(der: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(der))
}

/// Fingerprint of the single trusted signer of `entry`
pub fn signer_fingerprint(archive: &mut dyn SignedArchive, entry: &str) -> Result<String> {
    let signers = archive.signers(entry)?;
    let signer = match signers.as_slice() {
        [signer] => signer,
        [] => {
            return Err(UpdateError::validation(format!("{entry} is not signed")).into());
        }
        many => {
            return Err(UpdateError::validation(format!(
                "{entry} has {} signers, expected exactly one",
                many.len()
            ))
            .into());
        }
    };

    match signer.certificates.as_slice() {
        [certificate] => Ok(certificate_fingerprint(certificate)),
        path => Err(UpdateError::validation(format!(
            "Signer of {entry} has {} certificates, expected exactly one",
            path.len()
        ))
        .into()),
    }
}

/// Canonical form of a stored fingerprint: uppercase hex, no separators
pub fn normalize(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Resolve the fingerprint to store after seeing `computed`
///
/// An empty pin adopts `computed`. A non-empty pin must match it.
pub fn pin(stored: &str, computed: &str) -> Result<String> {
    let stored = normalize(stored);
    if stored.is_empty() {
        info!("Pinning signer fingerprint {}", computed);
        return Ok(computed.to_string());
    }
    if stored != computed {
        return Err(UpdateError::validation(format!(
            "Certificate fingerprints do not match: pinned {stored}, got {computed}"
        ))
        .into());
    }
    debug!("Signer fingerprint matches pin");
    Ok(stored)
}

/// Check the signer of `entry` against `stored` and return the fingerprint to persist
pub fn verify(archive: &mut dyn SignedArchive, entry: &str, stored: &str) -> Result<String> {
    let computed = signer_fingerprint(archive, entry)?;
    pin(stored, &computed)
}

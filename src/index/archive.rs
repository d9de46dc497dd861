// src/index/archive.rs

//! Signed archive access
//!
//! An index is published as a signed JAR. The pipeline needs three things
//! from it: the size of the catalog entry, a stream of the entry's bytes,
//! and the code signers of the entry. [`SignedArchive`] is that seam;
//! [`JarArchive`] implements it over a zip file.
//!
//! # JAR signature verification
//!
//! An entry is signed when all of the following hold:
//!
//! 1. `META-INF/MANIFEST.MF` lists it with a `SHA-256-Digest` matching its content
//! 2. a `META-INF/<NAME>.SF` signature file digests the whole manifest
//!    (`SHA-256-Digest-Manifest`) or the entry's manifest section
//! 3. the PKCS#7 block `META-INF/<NAME>.RSA|DSA|EC` carries a valid signature
//!    over the `.SF` bytes for every `SignerInfo`
//!
//! Each `SignerInfo` is one signer. Its certificate path starts at the
//! certificate named by the signer identifier and follows issuers through
//! the block's certificates. Any failed check rejects the archive.

use crate::error::{Result, UpdateError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedAttributes, SignedData, SignerIdentifier, SignerInfo};
use const_oid::db::{rfc5911, rfc5912};
use const_oid::ObjectIdentifier;
use ring::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;
use x509_cert::der::asn1::OctetString;
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;
use zip::result::ZipError;
use zip::ZipArchive;

const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// One code signer of an archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signer {
    /// DER-encoded certificates of the signer's certificate path, leaf first
    pub certificates: Vec<Vec<u8>>,
}

/// Archive holding a signed catalog entry
pub trait SignedArchive {
    /// Uncompressed size of an entry
    fn entry_size(&mut self, name: &str) -> Result<u64>;

    /// Stream the bytes of an entry
    fn open_entry(&mut self, name: &str) -> Result<Box<dyn Read + '_>>;

    /// Code signers of an entry; empty when the entry is unsigned
    fn signers(&mut self, name: &str) -> Result<Vec<Signer>>;
}

/// Opens downloaded artifacts as signed archives
pub trait ArchiveOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn SignedArchive>>;
}

/// Opener producing [`JarArchive`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct JarOpener;

impl ArchiveOpener for JarOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn SignedArchive>> {
        Ok(Box::new(JarArchive::open(path)?))
    }
}

/// A signed JAR on disk
pub struct JarArchive {
    zip: ZipArchive<File>,
}

impl JarArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let zip = ZipArchive::new(file).map_err(zip_error)?;
        Ok(Self { zip })
    }

    fn read_bytes(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut entry = match self.zip.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(zip_error(e)),
        };
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        Ok(Some(content))
    }

    fn sha256(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut entry = self.zip.by_name(name).map_err(|e| missing_entry(name, e))?;
        let mut hasher = Sha256::new();
        io::copy(&mut entry, &mut hasher)?;
        Ok(hasher.finalize().to_vec())
    }

    /// Signature block files paired with their `.SF` file
    fn signature_blocks(&self) -> Vec<(String, String)> {
        let names: Vec<&str> = self.zip.file_names().collect();
        let mut blocks: Vec<(String, String)> = names
            .iter()
            .filter_map(|name| {
                let file = name.strip_prefix("META-INF/")?;
                if file.contains('/') {
                    return None;
                }
                let (stem, ext) = file.rsplit_once('.')?;
                let is_block = ["RSA", "DSA", "EC"]
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known));
                let sf = format!("META-INF/{stem}.SF");
                (is_block && names.contains(&sf.as_str())).then(|| (name.to_string(), sf))
            })
            .collect();
        blocks.sort();
        blocks
    }
}

impl SignedArchive for JarArchive {
    fn entry_size(&mut self, name: &str) -> Result<u64> {
        let entry = self.zip.by_name(name).map_err(|e| missing_entry(name, e))?;
        Ok(entry.size())
    }

    fn open_entry(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
        let entry = self.zip.by_name(name).map_err(|e| missing_entry(name, e))?;
        Ok(Box::new(entry))
    }

    fn signers(&mut self, name: &str) -> Result<Vec<Signer>> {
        let Some(manifest_bytes) = self.read_bytes(MANIFEST_PATH)? else {
            debug!("Archive has no manifest; {} is unsigned", name);
            return Ok(Vec::new());
        };
        let manifest = utf8(MANIFEST_PATH, &manifest_bytes)?;
        let Some(expected) = manifest_digest(manifest, name) else {
            debug!("Manifest has no SHA-256 digest for {}", name);
            return Ok(Vec::new());
        };
        let expected = BASE64.decode(expected.as_bytes()).map_err(|e| {
            UpdateError::validation(format!("Invalid manifest digest for {name}")).with_source(e)
        })?;

        if self.sha256(name)? != expected {
            return Err(UpdateError::validation(format!(
                "Digest of {name} does not match the signed manifest"
            ))
            .into());
        }

        let mut signers = Vec::new();
        for (block, sf_path) in self.signature_blocks() {
            let der = self.read_bytes(&block)?.unwrap_or_default();
            let sf = self.read_bytes(&sf_path)?.unwrap_or_default();

            let verified = block_signers(&der, &sf)?;
            check_signature_file(utf8(&sf_path, &sf)?, manifest, name)?;
            debug!("{} holds {} verified signers", block, verified.len());
            signers.extend(verified);
        }
        Ok(signers)
    }
}

/// One section of a manifest or signature file
struct Section<'a> {
    /// Section text as written, including the blank line ending it
    raw: &'a str,
    attributes: Vec<(String, String)>,
}

impl Section<'_> {
    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Split manifest-format text into sections
///
/// Lines are wrapped at 72 bytes; a line starting with a space continues
/// the previous one. Blank lines end a section.
fn sections(text: &str) -> Vec<Section<'_>> {
    fn finish<'a>(raw: &'a str, lines: &mut Vec<String>, out: &mut Vec<Section<'a>>) {
        if lines.is_empty() {
            return;
        }
        let attributes = lines
            .drain(..)
            .filter_map(|line| {
                let (k, v) = line.split_once(':')?;
                Some((k.trim().to_string(), v.trim().to_string()))
            })
            .collect();
        out.push(Section { raw, attributes });
    }

    let mut out = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for raw in text.split_inclusive('\n') {
        offset += raw.len();
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            finish(&text[start..offset], &mut lines, &mut out);
            start = offset;
        } else if let Some(rest) = line.strip_prefix(' ')
            && let Some(last) = lines.last_mut()
        {
            last.push_str(rest);
        } else {
            lines.push(line.to_string());
        }
    }
    finish(&text[start..], &mut lines, &mut out);
    out
}

/// Find the `SHA-256-Digest` attribute of the manifest section for `entry`
pub fn manifest_digest(manifest: &str, entry: &str) -> Option<String> {
    sections(manifest)
        .into_iter()
        .find(|section| section.attribute("Name") == Some(entry))
        .and_then(|section| section.attribute("SHA-256-Digest").map(String::from))
}

/// Check that a signature file vouches for the manifest entry of `entry`
fn check_signature_file(sf: &str, manifest: &str, entry: &str) -> Result<()> {
    let sf_sections = sections(sf);
    if let Some(main) = sf_sections.first()
        && let Some(digest) = main.attribute("SHA-256-Digest-Manifest")
        && digest_matches(digest, manifest.as_bytes())
    {
        return Ok(());
    }

    let manifest_sections = sections(manifest);
    let manifest_section = manifest_sections
        .iter()
        .find(|section| section.attribute("Name") == Some(entry));
    let sf_section = sf_sections
        .iter()
        .find(|section| section.attribute("Name") == Some(entry));
    let covered = match (manifest_section, sf_section) {
        (Some(m), Some(s)) => s
            .attribute("SHA-256-Digest")
            .is_some_and(|digest| digest_matches(digest, m.raw.as_bytes())),
        _ => false,
    };

    if covered {
        Ok(())
    } else {
        Err(UpdateError::validation(format!(
            "Signature file does not cover the manifest entry of {entry}"
        ))
        .into())
    }
}

fn digest_matches(encoded: &str, data: &[u8]) -> bool {
    BASE64
        .decode(encoded.as_bytes())
        .is_ok_and(|digest| digest.as_slice() == Sha256::digest(data).as_slice())
}

/// Verified signers of one PKCS#7 SignedData block over `content`
fn block_signers(der: &[u8], content: &[u8]) -> Result<Vec<Signer>> {
    let info = ContentInfo::from_der(der).map_err(malformed)?;
    if info.content_type != rfc5911::ID_SIGNED_DATA {
        return Err(UpdateError::validation("Signature block is not PKCS#7 signed data").into());
    }
    let signed = SignedData::from_der(&info.content.to_der().map_err(malformed)?).map_err(malformed)?;

    let certificates: Vec<&Certificate> = signed
        .certificates
        .iter()
        .flat_map(|set| set.0.iter())
        .filter_map(|choice| match choice {
            CertificateChoices::Certificate(cert) => Some(cert),
            _ => None,
        })
        .collect();

    let mut signers = Vec::new();
    for info in signed.signer_infos.0.iter() {
        let leaf = signer_certificate(info, &certificates)?;
        verify_signer(info, leaf, content)?;
        let path = certificate_path(leaf, &certificates)
            .into_iter()
            .map(|cert| cert.to_der())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(malformed)?;
        signers.push(Signer { certificates: path });
    }
    Ok(signers)
}

/// Certificate named by the signer identifier
fn signer_certificate<'c>(info: &SignerInfo, certificates: &[&'c Certificate]) -> Result<&'c Certificate> {
    let SignerIdentifier::IssuerAndSerialNumber(id) = &info.sid else {
        return Err(
            UpdateError::validation("Signers identified by subject key are not supported").into(),
        );
    };
    certificates
        .iter()
        .copied()
        .find(|cert| {
            cert.tbs_certificate.issuer == id.issuer
                && cert.tbs_certificate.serial_number == id.serial_number
        })
        .ok_or_else(|| {
            UpdateError::validation("Signature block does not carry the signer's certificate")
                .into()
        })
}

/// `leaf` followed by its issuers found among `certificates`
fn certificate_path<'c>(leaf: &'c Certificate, certificates: &[&'c Certificate]) -> Vec<&'c Certificate> {
    let mut path = vec![leaf];
    let mut current = leaf;
    while current.tbs_certificate.issuer != current.tbs_certificate.subject {
        let issuer = certificates.iter().copied().find(|cert| {
            cert.tbs_certificate.subject == current.tbs_certificate.issuer
                && !path.iter().any(|seen| std::ptr::eq(*seen, *cert))
        });
        let Some(issuer) = issuer else {
            break;
        };
        path.push(issuer);
        current = issuer;
    }
    path
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    fn from_oid(oid: &ObjectIdentifier) -> Result<Self> {
        if *oid == rfc5912::ID_SHA_256 {
            Ok(Self::Sha256)
        } else if *oid == rfc5912::ID_SHA_384 {
            Ok(Self::Sha384)
        } else if *oid == rfc5912::ID_SHA_512 {
            Ok(Self::Sha512)
        } else {
            Err(UpdateError::validation(format!("Unsupported digest algorithm {oid}")).into())
        }
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    fn rsa_signature_oid(self) -> ObjectIdentifier {
        match self {
            Self::Sha256 => rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
            Self::Sha384 => rfc5912::SHA_384_WITH_RSA_ENCRYPTION,
            Self::Sha512 => rfc5912::SHA_512_WITH_RSA_ENCRYPTION,
        }
    }

    fn ecdsa_signature_oid(self) -> ObjectIdentifier {
        match self {
            Self::Sha256 => rfc5912::ECDSA_WITH_SHA_256,
            Self::Sha384 => rfc5912::ECDSA_WITH_SHA_384,
            Self::Sha512 => rfc5912::ECDSA_WITH_SHA_512,
        }
    }
}

/// Check one `SignerInfo` signature over `content` with the key of `certificate`
fn verify_signer(info: &SignerInfo, certificate: &Certificate, content: &[u8]) -> Result<()> {
    let digest = DigestAlgorithm::from_oid(&info.digest_alg.oid)?;
    let message = match &info.signed_attrs {
        Some(attributes) => {
            if message_digest(attributes)? != digest.digest(content) {
                return Err(UpdateError::validation(
                    "Signed message digest does not match the signature file",
                )
                .into());
            }
            attributes.to_der().map_err(malformed)?
        }
        None => content.to_vec(),
    };

    let algorithm = verification_algorithm(certificate, &info.signature_algorithm.oid, digest)?;
    let key = certificate
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .raw_bytes();
    UnparsedPublicKey::new(algorithm, key)
        .verify(&message, info.signature.as_bytes())
        .map_err(|_| {
            UpdateError::validation("Signature does not verify against the signer's certificate")
                .into()
        })
}

/// Value of the `messageDigest` signed attribute
fn message_digest(attributes: &SignedAttributes) -> Result<Vec<u8>> {
    let value = attributes
        .iter()
        .find(|attribute| attribute.oid == rfc5911::ID_MESSAGE_DIGEST)
        .and_then(|attribute| attribute.values.iter().next())
        .ok_or_else(|| UpdateError::validation("Signed attributes lack a message digest"))?;
    let digest = OctetString::from_der(&value.to_der().map_err(malformed)?).map_err(malformed)?;
    Ok(digest.as_bytes().to_vec())
}

/// Verification algorithm for the certificate's key type and the signer's digest
fn verification_algorithm(
    certificate: &Certificate,
    signature_oid: &ObjectIdentifier,
    digest: DigestAlgorithm,
) -> Result<&'static dyn VerificationAlgorithm> {
    let spki = &certificate.tbs_certificate.subject_public_key_info;
    let unsupported = || -> crate::Error {
        UpdateError::validation(format!(
            "Unsupported signature algorithm {signature_oid} for key {}",
            spki.algorithm.oid
        ))
        .into()
    };

    if spki.algorithm.oid == rfc5912::RSA_ENCRYPTION {
        if *signature_oid != rfc5912::RSA_ENCRYPTION && *signature_oid != digest.rsa_signature_oid() {
            return Err(unsupported());
        }
        let algorithm: &'static dyn VerificationAlgorithm = match digest {
            DigestAlgorithm::Sha256 => &signature::RSA_PKCS1_2048_8192_SHA256,
            DigestAlgorithm::Sha384 => &signature::RSA_PKCS1_2048_8192_SHA384,
            DigestAlgorithm::Sha512 => &signature::RSA_PKCS1_2048_8192_SHA512,
        };
        return Ok(algorithm);
    }

    if spki.algorithm.oid == rfc5912::ID_EC_PUBLIC_KEY {
        if *signature_oid != rfc5912::ID_EC_PUBLIC_KEY
            && *signature_oid != digest.ecdsa_signature_oid()
        {
            return Err(unsupported());
        }
        let curve = spki
            .algorithm
            .parameters
            .as_ref()
            .and_then(|parameters| parameters.decode_as::<ObjectIdentifier>().ok())
            .ok_or_else(unsupported)?;
        let p256 = curve == rfc5912::SECP_256_R_1;
        let p384 = curve == rfc5912::SECP_384_R_1;
        let algorithm: &'static dyn VerificationAlgorithm = match digest {
            DigestAlgorithm::Sha256 if p256 => &signature::ECDSA_P256_SHA256_ASN1,
            DigestAlgorithm::Sha384 if p256 => &signature::ECDSA_P256_SHA384_ASN1,
            DigestAlgorithm::Sha256 if p384 => &signature::ECDSA_P384_SHA256_ASN1,
            DigestAlgorithm::Sha384 if p384 => &signature::ECDSA_P384_SHA384_ASN1,
            _ => return Err(unsupported()),
        };
        return Ok(algorithm);
    }

    Err(unsupported())
}

fn utf8<'a>(name: &str, bytes: &'a [u8]) -> Result<&'a str> {
    std::str::from_utf8(bytes).map_err(|e| {
        UpdateError::validation(format!("{name} is not valid UTF-8"))
            .with_source(e)
            .into()
    })
}

fn malformed(e: x509_cert::der::Error) -> crate::Error {
    UpdateError::validation("Malformed signature block")
        .with_source(e)
        .into()
}

fn zip_error(e: ZipError) -> crate::Error {
    UpdateError::parse("Malformed index archive").with_source(e).into()
}

fn missing_entry(name: &str, e: ZipError) -> crate::Error {
    match e {
        ZipError::FileNotFound => {
            UpdateError::parse(format!("Index archive has no entry {name}")).into()
        }
        other => zip_error(other),
    }
}

// src/index/v1.rs

//! Streaming parser for `index-v1.json`
//!
//! The document is a single JSON object:
//!
//! ```text
//! { "repo": {...}, "requests": {...}, "apps": [ {...}, ... ],
//!   "packages": { "<packageName>": [ {...}, ... ], ... } }
//! ```
//!
//! The top-level object is visited key by key with `serde`'s `Visitor`
//! machinery. `apps` elements and `packages` entries are deserialized one at
//! a time and pushed into the sink immediately, so memory use does not grow
//! with the size of the catalog.

use super::{IndexParser, IndexSink};
use crate::error::{Error, Result, UpdateError};
use crate::model::{Product, Release, RepositoryMetadata};
use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufReader, Read};

/// Parser for the `index-v1.json` catalog entry
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexV1Parser;

impl IndexV1Parser {
    pub fn new() -> Self {
        Self
    }
}

impl IndexParser for IndexV1Parser {
    fn parse(
        &self,
        repository_id: i64,
        reader: &mut dyn Read,
        sink: &mut dyn IndexSink,
    ) -> Result<()> {
        let mut failure = None;
        let mut de = serde_json::Deserializer::from_reader(BufReader::new(reader));

        let result = (&mut de)
            .deserialize_map(IndexVisitor {
                repository_id,
                sink,
                failure: &mut failure,
            })
            .and_then(|()| de.end());

        // A sink error aborts deserialization; report it rather than the
        // placeholder serde error it was wrapped in.
        if let Some(err) = failure {
            return Err(err);
        }
        result.map_err(|e| UpdateError::parse(format!("Malformed index-v1 catalog: {e}")).with_source(e).into())
    }
}

/// Hand a sink result back to serde, stashing the real error
fn deliver<E: de::Error>(failure: &mut Option<Error>, result: Result<()>) -> std::result::Result<(), E> {
    result.map_err(|err| {
        *failure = Some(err);
        E::custom("index sink aborted")
    })
}

struct IndexVisitor<'a, S: IndexSink + ?Sized> {
    repository_id: i64,
    sink: &'a mut S,
    failure: &'a mut Option<Error>,
}

impl<'de, S: IndexSink + ?Sized> Visitor<'de> for IndexVisitor<'_, S> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an index-v1 object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<(), A::Error> {
        let IndexVisitor {
            repository_id,
            sink,
            failure,
        } = self;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "repo" => {
                    let repo: RepoV1 = map.next_value()?;
                    deliver(failure, sink.on_repository(repo.into_metadata()))?;
                }
                "apps" => map.next_value_seed(AppsSeed {
                    repository_id,
                    sink: &mut *sink,
                    failure: &mut *failure,
                })?,
                "packages" => map.next_value_seed(PackagesSeed {
                    sink: &mut *sink,
                    failure: &mut *failure,
                })?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(())
    }
}

/// Streams the `apps` array
struct AppsSeed<'a, S: IndexSink + ?Sized> {
    repository_id: i64,
    sink: &'a mut S,
    failure: &'a mut Option<Error>,
}

impl<'de, S: IndexSink + ?Sized> DeserializeSeed<'de> for AppsSeed<'_, S> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, S: IndexSink + ?Sized> Visitor<'de> for AppsSeed<'_, S> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of apps")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<(), A::Error> {
        while let Some(app) = seq.next_element::<AppV1>()? {
            let product = app.into_product(self.repository_id);
            deliver(self.failure, self.sink.on_product(product))?;
        }
        Ok(())
    }
}

/// Streams the `packages` object
struct PackagesSeed<'a, S: IndexSink + ?Sized> {
    sink: &'a mut S,
    failure: &'a mut Option<Error>,
}

impl<'de, S: IndexSink + ?Sized> DeserializeSeed<'de> for PackagesSeed<'_, S> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, S: IndexSink + ?Sized> Visitor<'de> for PackagesSeed<'_, S> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of package names to releases")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<(), A::Error> {
        while let Some(package_name) = map.next_key::<String>()? {
            let packages: Vec<PackageV1> = map.next_value()?;
            let releases = packages.into_iter().map(PackageV1::into_release).collect();
            deliver(self.failure, self.sink.on_releases(package_name, releases))?;
        }
        Ok(())
    }
}

// =============================================================================
// Wire types
// =============================================================================

/// Accepts numbers, numeric strings, empty strings and null
fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Number(i64),
        Text(String),
        Null,
    }

    match Lenient::deserialize(deserializer)? {
        Lenient::Number(n) => Ok(n),
        Lenient::Text(s) if s.trim().is_empty() => Ok(0),
        Lenient::Text(s) => s.trim().parse().map_err(de::Error::custom),
        Lenient::Null => Ok(0),
    }
}

fn lenient_i32<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i32, D::Error> {
    let value = lenient_i64(deserializer)?;
    i32::try_from(value).map_err(de::Error::custom)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RepoV1 {
    name: String,
    description: String,
    #[serde(deserialize_with = "lenient_i32")]
    version: i32,
    #[serde(deserialize_with = "lenient_i64")]
    timestamp: i64,
    mirrors: Vec<String>,
}

impl RepoV1 {
    fn into_metadata(self) -> RepositoryMetadata {
        RepositoryMetadata {
            mirrors: self.mirrors,
            name: self.name,
            description: self.description,
            version: self.version,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LocalizedV1 {
    name: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    whats_new: Option<String>,
    phone_screenshots: Vec<String>,
}

/// Top-level value unless empty, then the localized one
fn localized(own: &Option<String>, fallback: Option<&Option<String>>) -> String {
    own.as_ref()
        .filter(|s| !s.is_empty())
        .or_else(|| fallback.and_then(Option::as_ref))
        .cloned()
        .unwrap_or_default()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AppV1 {
    package_name: String,
    name: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    whats_new: Option<String>,
    icon: String,
    author_name: String,
    license: String,
    source_code: String,
    web_site: String,
    issue_tracker: String,
    changelog: String,
    #[serde(deserialize_with = "lenient_i64")]
    added: i64,
    #[serde(deserialize_with = "lenient_i64")]
    last_updated: i64,
    #[serde(deserialize_with = "lenient_i64")]
    suggested_version_code: i64,
    categories: Vec<String>,
    anti_features: Vec<String>,
    donate: Option<String>,
    bitcoin: Option<String>,
    liberapay: Option<String>,
    open_collective: Option<String>,
    localized: BTreeMap<String, LocalizedV1>,
}

impl AppV1 {
    /// Preferred localization: en-US, then en, then whatever comes first
    fn locale(&self) -> Option<(&str, &LocalizedV1)> {
        ["en-US", "en"]
            .iter()
            .find_map(|key| self.localized.get_key_value(*key))
            .or_else(|| self.localized.iter().next())
            .map(|(key, value)| (key.as_str(), value))
    }

    fn into_product(self, repository_id: i64) -> Product {
        let locale = self.locale();
        let name = localized(&self.name, locale.map(|(_, l)| &l.name));
        let summary = localized(&self.summary, locale.map(|(_, l)| &l.summary));
        let description = localized(&self.description, locale.map(|(_, l)| &l.description));
        let whats_new = localized(&self.whats_new, locale.map(|(_, l)| &l.whats_new));
        let screenshots = locale
            .map(|(key, l)| {
                l.phone_screenshots
                    .iter()
                    .map(|file| format!("{key}/phoneScreenshots/{file}"))
                    .collect()
            })
            .unwrap_or_default();

        let mut donates = Vec::new();
        donates.extend(self.donate.clone());
        donates.extend(self.bitcoin.as_ref().map(|a| format!("bitcoin:{a}")));
        donates.extend(self.liberapay.as_ref().map(|id| format!("https://liberapay.com/{id}")));
        donates.extend(
            self.open_collective
                .as_ref()
                .map(|id| format!("https://opencollective.com/{id}")),
        );

        Product {
            repository_id,
            package_name: self.package_name,
            name,
            summary,
            description,
            whats_new,
            icon: self.icon,
            author: self.author_name,
            license: self.license,
            source: self.source_code,
            web: self.web_site,
            tracker: self.issue_tracker,
            changelog: self.changelog,
            added: self.added,
            updated: self.last_updated,
            suggested_version_code: self.suggested_version_code,
            categories: self.categories,
            anti_features: self.anti_features,
            donates,
            screenshots,
            releases: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PackageV1 {
    #[serde(deserialize_with = "lenient_i64")]
    version_code: i64,
    version_name: String,
    #[serde(deserialize_with = "lenient_i64")]
    added: i64,
    #[serde(deserialize_with = "lenient_i64")]
    size: i64,
    #[serde(deserialize_with = "lenient_i32")]
    min_sdk_version: i32,
    #[serde(deserialize_with = "lenient_i32")]
    target_sdk_version: i32,
    #[serde(deserialize_with = "lenient_i32")]
    max_sdk_version: i32,
    srcname: String,
    apk_name: String,
    hash: String,
    hash_type: String,
    sig: String,
    signer: String,
    #[serde(rename = "uses-permission")]
    uses_permission: Vec<serde_json::Value>,
    #[serde(rename = "uses-permission-sdk-23")]
    uses_permission_sdk_23: Vec<serde_json::Value>,
    features: Vec<String>,
    nativecode: Vec<String>,
}

/// Permissions are `[name, maxSdk]` pairs, occasionally bare strings
fn permission_name(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(name) => Some(name.clone()),
        serde_json::Value::Array(items) => items.first()?.as_str().map(String::from),
        _ => None,
    }
}

impl PackageV1 {
    fn into_release(self) -> Release {
        let mut permissions: Vec<String> = self
            .uses_permission
            .iter()
            .chain(self.uses_permission_sdk_23.iter())
            .filter_map(permission_name)
            .collect();
        permissions.sort();
        permissions.dedup();

        let signature = if self.signer.is_empty() { self.sig } else { self.signer };

        Release {
            selected: false,
            version: self.version_name,
            version_code: self.version_code,
            added: self.added,
            size: self.size,
            min_platform_version: self.min_sdk_version,
            target_platform_version: self.target_sdk_version,
            max_platform_version: self.max_sdk_version,
            source: self.srcname,
            release: self.apk_name,
            hash: self.hash,
            hash_type: self.hash_type,
            signature,
            permissions,
            features: self.features,
            platforms: self.nativecode,
            incompatibilities: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpdateErrorKind;
    use serde_json::json;

    #[derive(Default)]
    struct Collect {
        repository: Vec<RepositoryMetadata>,
        products: Vec<Product>,
        releases: Vec<(String, Vec<Release>)>,
        fail_on_product: bool,
    }

    impl IndexSink for Collect {
        fn on_repository(&mut self, metadata: RepositoryMetadata) -> Result<()> {
            self.repository.push(metadata);
            Ok(())
        }

        fn on_product(&mut self, product: Product) -> Result<()> {
            if self.fail_on_product {
                return Err(Error::Cancelled);
            }
            self.products.push(product);
            Ok(())
        }

        fn on_releases(&mut self, package_name: String, releases: Vec<Release>) -> Result<()> {
            self.releases.push((package_name, releases));
            Ok(())
        }
    }

    fn sample() -> serde_json::Value {
        json!({
            "repo": {
                "timestamp": 1_700_000_000_000_i64,
                "version": 21,
                "name": "Example Repo",
                "description": "Apps",
                "mirrors": ["https://mirror.example.com/repo"]
            },
            "requests": { "install": [], "uninstall": [] },
            "apps": [
                {
                    "packageName": "org.example.notes",
                    "suggestedVersionCode": "3",
                    "license": "GPL-3.0-only",
                    "categories": ["Writing"],
                    "lastUpdated": 1_690_000_000_000_i64,
                    "bitcoin": "bc1qexample",
                    "localized": {
                        "de": { "name": "Notizen" },
                        "en-US": {
                            "name": "Notes",
                            "summary": "Take notes",
                            "phoneScreenshots": ["1.png"]
                        }
                    }
                }
            ],
            "packages": {
                "org.example.notes": [
                    {
                        "versionCode": 3,
                        "versionName": "1.2",
                        "hash": "aa",
                        "hashType": "sha256",
                        "minSdkVersion": "21",
                        "nativecode": ["arm64-v8a"],
                        "uses-permission": [["android.permission.INTERNET", null]],
                        "uses-permission-sdk-23": [["android.permission.CAMERA", null]],
                        "signer": "cafe"
                    },
                    { "versionCode": 2, "versionName": "1.1", "hash": "bb", "sig": "beef" }
                ]
            }
        })
    }

    fn parse(value: &serde_json::Value, sink: &mut Collect) -> Result<()> {
        let bytes = serde_json::to_vec(value).unwrap();
        IndexV1Parser::new().parse(7, &mut bytes.as_slice(), sink)
    }

    #[test]
    fn test_parse_sample() {
        let mut sink = Collect::default();
        parse(&sample(), &mut sink).unwrap();

        assert_eq!(sink.repository.len(), 1);
        assert_eq!(sink.repository[0].name, "Example Repo");
        assert_eq!(sink.repository[0].timestamp, 1_700_000_000_000);
        assert_eq!(sink.repository[0].version, 21);

        assert_eq!(sink.products.len(), 1);
        let product = &sink.products[0];
        assert_eq!(product.repository_id, 7);
        assert_eq!(product.name, "Notes");
        assert_eq!(product.summary, "Take notes");
        assert_eq!(product.suggested_version_code, 3);
        assert_eq!(product.screenshots, vec!["en-US/phoneScreenshots/1.png"]);
        assert_eq!(product.donates, vec!["bitcoin:bc1qexample"]);

        assert_eq!(sink.releases.len(), 1);
        let (name, releases) = &sink.releases[0];
        assert_eq!(name, "org.example.notes");
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[0].min_platform_version, 21);
        assert_eq!(releases[0].platforms, vec!["arm64-v8a"]);
        assert_eq!(
            releases[0].permissions,
            vec!["android.permission.CAMERA", "android.permission.INTERNET"]
        );
        assert_eq!(releases[0].signature, "cafe");
        assert_eq!(releases[1].signature, "beef");
    }

    #[test]
    fn test_malformed_input_is_parse_error() {
        let mut sink = Collect::default();
        let err = IndexV1Parser::new()
            .parse(1, &mut &b"{\"repo\": {\"name\": "[..], &mut sink)
            .unwrap_err();
        assert_eq!(err.update_kind(), Some(UpdateErrorKind::Parse));
    }

    #[test]
    fn test_trailing_garbage_is_parse_error() {
        let mut sink = Collect::default();
        let err = IndexV1Parser::new()
            .parse(1, &mut &b"{} {}"[..], &mut sink)
            .unwrap_err();
        assert_eq!(err.update_kind(), Some(UpdateErrorKind::Parse));
    }

    #[test]
    fn test_sink_error_is_returned_unchanged() {
        let mut sink = Collect {
            fail_on_product: true,
            ..Default::default()
        };
        let err = parse(&sample(), &mut sink).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(sink.releases.is_empty());
    }

    #[test]
    fn test_unknown_sections_are_skipped() {
        let mut sink = Collect::default();
        let doc = json!({ "extra": { "nested": [1, 2, 3] }, "repo": { "name": "R" }, "apps": [] });
        parse(&doc, &mut sink).unwrap();
        assert_eq!(sink.repository.len(), 1);
        assert!(sink.products.is_empty());
    }
}

// src/update/compat.rs

//! Release ranking and compatibility checks
//!
//! Every product is rewritten before it is staged: duplicate releases are
//! dropped, releases are ordered newest first, each release is tagged with
//! the reasons it cannot run on the device, and one release is marked as
//! selected.

use crate::config::DeviceProfile;
use crate::model::{Incompatibility, Product, Release};
use std::collections::HashSet;

/// Rewrite `product` against `device`
///
/// With `unstable` unset only releases at or below the publisher's suggested
/// version code can be selected. The first compatible selectable release is
/// chosen; when none is compatible the first selectable one is.
pub fn transform_product(mut product: Product, device: &DeviceProfile, unstable: bool) -> Product {
    let mut seen = HashSet::new();
    let mut releases: Vec<Release> = product
        .releases
        .into_iter()
        .filter(|release| seen.insert(release.identifier()))
        .collect();
    releases.sort_by(|a, b| b.version_code.cmp(&a.version_code));

    for release in &mut releases {
        release.incompatibilities = incompatibilities(release, device);
        release.selected = false;
    }

    let suggested = product.suggested_version_code;
    let selectable = |release: &Release| {
        unstable || suggested <= 0 || release.version_code <= suggested
    };

    let chosen = releases
        .iter()
        .find(|r| r.incompatibilities.is_empty() && selectable(r))
        .or_else(|| releases.iter().find(|r| selectable(r)))
        .map(|r| (r.version_code, r.incompatibilities.clone()));

    if let Some((version_code, incompatibilities)) = chosen {
        for release in &mut releases {
            release.selected = release.version_code == version_code
                && release.incompatibilities == incompatibilities;
        }
    }

    product.releases = releases;
    product
}

/// Reasons `release` cannot run on `device`, in a fixed order
pub fn incompatibilities(release: &Release, device: &DeviceProfile) -> Vec<Incompatibility> {
    let mut result = Vec::new();

    if release.min_platform_version > 0 && device.platform_version < release.min_platform_version {
        result.push(Incompatibility::MinPlatform);
    }
    if release.max_platform_version > 0 && device.platform_version > release.max_platform_version {
        result.push(Incompatibility::MaxPlatform);
    }
    if !release.platforms.is_empty()
        && !release.platforms.iter().any(|p| device.platforms.contains(p))
    {
        result.push(Incompatibility::Platform);
    }

    let mut missing: Vec<&String> = release
        .features
        .iter()
        .filter(|f| !device.features.contains(*f))
        .collect();
    missing.sort();
    missing.dedup();
    result.extend(missing.into_iter().cloned().map(Incompatibility::Feature));

    result
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::{SNAPSHOT_VERSION, SUPPORTED_VERSION_CONSTRAINT};
use crate::Error;
use semver::{BuildMetadata, Prerelease, Version, VersionReq};
use tracing::warn;

/// Parses the requested Astarte version and checks it against the versions this
/// controller supports.
///
/// A pre-release label (e.g. `0.11.0-beta.1`) is dropped for the constraint check
/// only, so that pre-releases of a supported version are accepted; the returned
/// version keeps it. Loose forms such as `v0.11.0`, `0.11` or `0.11-snapshot` are
/// read as the full version they stand for.
pub fn parse_and_validate(version: &str) -> Result<Version, Error> {
    let parsed = Version::parse(&coerce(version)).map_err(|e| Error::InvalidVersion {
        version: version.to_string(),
        reason: e.to_string(),
    })?;
    let constraint = VersionReq::parse(SUPPORTED_VERSION_CONSTRAINT).map_err(|e| Error::InvalidVersion {
        version: SUPPORTED_VERSION_CONSTRAINT.to_string(),
        reason: e.to_string(),
    })?;

    let checked = if parsed.pre.is_empty() {
        parsed.clone()
    } else {
        warn!(
            version = %parsed,
            "you are running a pre-release version of Astarte, this might lead to unexpected behavior"
        );
        strip_pre_release(&parsed)
    };

    if !constraint.matches(&checked) {
        return Err(Error::UnsupportedVersion {
            version: version.to_string(),
            constraint: SUPPORTED_VERSION_CONSTRAINT,
        });
    }
    Ok(parsed)
}

/// Completes a loosely written version: drops a leading `v` and pads a missing
/// minor or patch number with zeros, keeping any pre-release or build suffix.
pub fn coerce(version: &str) -> String {
    let version = version.trim();
    let version = version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version);
    let (core, suffix) = match version.find(['-', '+']) {
        Some(at) => version.split_at(at),
        None => (version, ""),
    };
    let numbers = core.split('.').count();
    if core.is_empty() || numbers >= 3 {
        return version.to_string();
    }
    let mut coerced = core.to_string();
    for _ in numbers..3 {
        coerced.push_str(".0");
    }
    coerced + suffix
}

pub fn strip_pre_release(version: &Version) -> Version {
    Version {
        pre: Prerelease::EMPTY,
        build: BuildMetadata::EMPTY,
        ..version.clone()
    }
}

/// Turns a recorded or requested version into something comparable:
/// `0.11-snapshot` becomes `0.11.0`.
pub fn normalize_snapshot(version: &str) -> String {
    version.replace(&format!("-{}", SNAPSHOT_VERSION), ".0")
}

/// Parses a version that is not user-facing (recorded in status, or derived from
/// an image tag).
pub fn parse_recorded(version: &str) -> Result<Version, Error> {
    Version::parse(&coerce(&normalize_snapshot(version))).map_err(|e| Error::InvalidRecordedVersion {
        version: version.to_string(),
        reason: e.to_string(),
    })
}

/// Picks one of two defaults depending on whether the Astarte version is below threshold.
pub fn version_dependent<T>(astarte_version: &str, threshold: &Version, below: T, at_or_above: T) -> T {
    match parse_recorded(astarte_version) {
        Ok(v) if strip_pre_release(&v) < *threshold => below,
        _ => at_or_above,
    }
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod astarte_controller;
pub mod executable_model;
pub mod kubernetes_api_objects;
pub mod shim_layer;
#[cfg(test)]
pub mod unit_tests;

use kubernetes_api_objects::error::APIRequestError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    KubeApi(#[from] APIRequestError),
    #[error("Could not build a valid Astarte semantic version out of requested version {version}: {reason}")]
    InvalidVersion { version: String, reason: String },
    #[error("Astarte version {version} is not supported by this operator, supported versions: {constraint}")]
    UnsupportedVersion { version: String, constraint: &'static str },
    #[error("Could not parse Astarte version {version}: {reason}")]
    InvalidRecordedVersion { version: String, reason: String },
    #[error("Could not determine the Astarte version out of image {0}")]
    UnrecognizedImage(String),
    #[error(
        "Astarte Upgrade requested, but the cluster isn't reporting stable Health. Refusing to upgrade. \
         Please revert to {recorded_version} and wait for the cluster to stabilize"
    )]
    UnstableHealth { recorded_version: String },
    #[error("Upgrade to Astarte {target} in progress: {detail}")]
    UpgradeInProgress { target: String, detail: String },
    #[error("Invalid {component} definition: {reason}")]
    InvalidDefinition { component: &'static str, reason: String },
    #[error("{0} is not ready yet")]
    DependencyNotReady(String),
    #[error("Failed to generate key pair: {0}")]
    KeyGenerationFailed(String),
    #[error("Failed to fetch the CFSSL CA certificate: {0}")]
    CaFetchFailed(String),
    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),
}

/// How soon a failed reconcile should run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeuePolicy {
    /// Retry after the configured error backoff.
    Backoff,
    /// Retry after a fixed delay.
    After(Duration),
    /// Only retry when the object changes.
    Never,
}

pub const SLOW_REQUEUE_DELAY: Duration = Duration::from_secs(60);

impl Error {
    pub fn requeue_policy(&self) -> RequeuePolicy {
        match self {
            Error::UnsupportedVersion { .. } | Error::UnstableHealth { .. } => RequeuePolicy::Never,
            Error::InvalidVersion { .. } | Error::InvalidRecordedVersion { .. } | Error::UnrecognizedImage(_) => {
                RequeuePolicy::After(SLOW_REQUEUE_DELAY)
            }
            _ => RequeuePolicy::Backoff,
        }
    }
}

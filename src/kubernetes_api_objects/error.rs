// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use kube::core::ErrorResponse;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum APIError {
    #[error("object not found")]
    ObjectNotFound,
    #[error("object already exists")]
    ObjectAlreadyExists,
    #[error("bad request")]
    BadRequest,
    #[error("conflict")]
    Conflict,
    #[error("invalid object")]
    Invalid,
    #[error("forbidden")]
    Forbidden,
    #[error("internal error")]
    InternalError,
    #[error("timeout")]
    Timeout,
    #[error("server timeout")]
    ServerTimeout,
    #[error("failed to marshal or unmarshal object: {0}")]
    MarshalFailed(String),
    #[error("{0}")]
    Other(String),
}

impl APIError {
    pub fn is_object_not_found(&self) -> bool {
        matches!(self, APIError::ObjectNotFound)
    }

    pub fn is_object_already_exists(&self) -> bool {
        matches!(self, APIError::ObjectAlreadyExists)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, APIError::Conflict)
    }
}

// kube_error_to_api_error translates the error returned by kube-rs APIs
// to the form that is processed by the reconciler.
pub fn kube_error_to_api_error(error: &kube::Error) -> APIError {
    match error {
        kube::Error::Api(ErrorResponse { reason, message, .. }) => match reason.as_str() {
            "NotFound" => APIError::ObjectNotFound,
            "AlreadyExists" => APIError::ObjectAlreadyExists,
            "BadRequest" => APIError::BadRequest,
            "Conflict" => APIError::Conflict,
            "Invalid" => APIError::Invalid,
            "Forbidden" => APIError::Forbidden,
            "InternalError" => APIError::InternalError,
            "Timeout" => APIError::Timeout,
            "ServerTimeout" => APIError::ServerTimeout,
            _ => APIError::Other(format!("{}: {}", reason, message)),
        },
        kube::Error::SerdeError(err) => APIError::MarshalFailed(err.to_string()),
        other => APIError::Other(other.to_string()),
    }
}

/// An [`APIError`] together with the request that produced it.
#[derive(Debug, Clone, Error)]
#[error("{verb} {key} failed: {error}")]
pub struct APIRequestError {
    pub verb: &'static str,
    pub key: String,
    #[source]
    pub error: APIError,
}

impl APIRequestError {
    pub fn new(verb: &'static str, key: impl Into<String>, error: APIError) -> APIRequestError {
        APIRequestError {
            verb,
            key: key.into(),
            error,
        }
    }

    pub fn is_object_not_found(&self) -> bool {
        self.error.is_object_not_found()
    }

    pub fn is_object_already_exists(&self) -> bool {
        self.error.is_object_already_exists()
    }

    pub fn is_conflict(&self) -> bool {
        self.error.is_conflict()
    }
}

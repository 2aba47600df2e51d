// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::Error;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Fetches the PEM certificate of the CA CFSSL signs device certificates with.
#[async_trait]
pub trait CaCertificateSource: Send + Sync {
    async fn fetch_ca_certificate(&self, cfssl_url: &str) -> Result<String, Error>;
}

/// Asks a running CFSSL through its `info` endpoint.
pub struct CfsslInfoClient {
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CfsslInfoResponse {
    success: bool,
    result: Option<CfsslInfoResult>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CfsslInfoResult {
    certificate: String,
}

impl CfsslInfoClient {
    pub fn new(timeout: Duration) -> Result<CfsslInfoClient, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::CaFetchFailed(e.to_string()))?;
        Ok(CfsslInfoClient { http })
    }
}

#[async_trait]
impl CaCertificateSource for CfsslInfoClient {
    async fn fetch_ca_certificate(&self, cfssl_url: &str) -> Result<String, Error> {
        let url = format!("{}/api/v1/cfssl/info", cfssl_url.trim_end_matches('/'));
        let resp: CfsslInfoResponse = self
            .http
            .post(&url)
            .json(&json!({}))
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Error::CaFetchFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::CaFetchFailed(e.to_string()))?;
        match resp.result {
            Some(result) if resp.success => Ok(result.certificate),
            _ => Err(Error::CaFetchFailed(format!("CFSSL reported errors: {:?}", resp.errors))),
        }
    }
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{api_method::*, error::APIError};
use crate::shim_layer::api_server::ApiServer;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

// FaultInjectingApiServer simulates a controller crash right after it issues
// a request that changes the cluster state.
//
// `current` counts the create, update and delete requests sent so far; when it
// reaches `expected` the request is applied and then reported as failed, which
// aborts the reconcile pass at that exact point. Following passes run normally.
pub struct FaultInjectingApiServer<S> {
    inner: S,
    counters: Mutex<FaultCounters>,
}

#[derive(Debug, Clone, Copy)]
struct FaultCounters {
    current: u64,
    expected: u64,
}

impl<S: ApiServer> FaultInjectingApiServer<S> {
    pub fn new(inner: S, expected: u64) -> FaultInjectingApiServer<S> {
        FaultInjectingApiServer {
            inner,
            counters: Mutex::new(FaultCounters { current: 0, expected }),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of successful writes seen so far.
    pub fn writes(&self) -> u64 {
        self.counters.lock().current
    }

    pub fn has_crashed(&self) -> bool {
        let counters = self.counters.lock();
        counters.expected != 0 && counters.current >= counters.expected
    }

    // crash_or_continue advances the write counter and tells whether the
    // controller should crash at this point.
    fn crash_or_continue(&self, key: &str) -> bool {
        let mut counters = self.counters.lock();
        counters.current += 1;
        if counters.current == counters.expected {
            warn!(key = %key, write = counters.current, "injecting crash after write");
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl<S: ApiServer> ApiServer for FaultInjectingApiServer<S> {
    async fn handle(&self, req: KubeAPIRequest) -> KubeAPIResponse {
        if !req.is_mutation() {
            return self.inner.handle(req).await;
        }
        let key = req.key();
        let req_copy = req.clone();
        let resp = self.inner.handle(req).await;
        if !resp.is_err() && self.crash_or_continue(&key) {
            return KubeAPIResponse::error_for(&req_copy, APIError::Other("injected crash".to_string()));
        }
        resp
    }
}

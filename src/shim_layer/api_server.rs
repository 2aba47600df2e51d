// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{api_method::*, error::*};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// ApiServer is the only way the reconciler talks to the cluster.
///
/// [`KubeApiServer`] sends the requests to a real Kubernetes API through kube-rs,
/// the executable model keeps the cluster state in memory, and
/// [`crate::shim_layer::fault_injection::FaultInjectingApiServer`] wraps either of them.
#[async_trait]
pub trait ApiServer: Send + Sync {
    async fn handle(&self, req: KubeAPIRequest) -> KubeAPIResponse;
}

#[async_trait]
impl<S: ApiServer + ?Sized> ApiServer for Arc<S> {
    async fn handle(&self, req: KubeAPIRequest) -> KubeAPIResponse {
        self.as_ref().handle(req).await
    }
}

pub struct KubeApiServer {
    client: Client,
}

impl KubeApiServer {
    pub fn new(client: Client) -> KubeApiServer {
        KubeApiServer { client }
    }

    fn api(&self, req_namespace: &str, api_resource: &kube::api::ApiResource) -> Api<DynamicObject> {
        Api::<DynamicObject>::namespaced_with(self.client.clone(), req_namespace, api_resource)
    }
}

#[async_trait]
impl ApiServer for KubeApiServer {
    async fn handle(&self, req: KubeAPIRequest) -> KubeAPIResponse {
        let key = req.key();
        let verb = req.verb();
        let resp = match req {
            KubeAPIRequest::GetRequest(get_req) => {
                let api = self.api(&get_req.namespace, &get_req.api_resource);
                KubeAPIResponse::GetResponse(KubeGetResponse {
                    res: api.get(&get_req.name).await.map_err(|e| kube_error_to_api_error(&e)),
                })
            }
            KubeAPIRequest::ListRequest(list_req) => {
                let api = self.api(&list_req.namespace, &list_req.api_resource);
                let lp = match &list_req.label_selector {
                    Some(selector) => ListParams::default().labels(selector),
                    None => ListParams::default(),
                };
                KubeAPIResponse::ListResponse(KubeListResponse {
                    res: api
                        .list(&lp)
                        .await
                        .map(|obj_list| obj_list.items)
                        .map_err(|e| kube_error_to_api_error(&e)),
                })
            }
            KubeAPIRequest::CreateRequest(create_req) => {
                let api = self.api(&create_req.namespace, &create_req.api_resource);
                KubeAPIResponse::CreateResponse(KubeCreateResponse {
                    res: api
                        .create(&PostParams::default(), &create_req.obj)
                        .await
                        .map_err(|e| kube_error_to_api_error(&e)),
                })
            }
            KubeAPIRequest::DeleteRequest(delete_req) => {
                let api = self.api(&delete_req.namespace, &delete_req.api_resource);
                // Background propagation lets the garbage collector remove dependents.
                let dp = DeleteParams::background();
                KubeAPIResponse::DeleteResponse(KubeDeleteResponse {
                    res: api
                        .delete(&delete_req.name, &dp)
                        .await
                        .map(|_| ())
                        .map_err(|e| kube_error_to_api_error(&e)),
                })
            }
            KubeAPIRequest::UpdateRequest(update_req) => {
                let api = self.api(&update_req.namespace, &update_req.api_resource);
                KubeAPIResponse::UpdateResponse(KubeUpdateResponse {
                    res: api
                        .replace(&update_req.name, &PostParams::default(), &update_req.obj)
                        .await
                        .map_err(|e| kube_error_to_api_error(&e)),
                })
            }
            KubeAPIRequest::UpdateStatusRequest(update_status_req) => {
                let api = self.api(&update_status_req.namespace, &update_status_req.api_resource);
                // The resource version in the patch body makes the server reject stale writes.
                let patch = json!({
                    "metadata": {
                        "resourceVersion": update_status_req.obj.metadata.resource_version,
                    },
                    "status": update_status_req.obj.data.get("status"),
                });
                KubeAPIResponse::UpdateStatusResponse(KubeUpdateStatusResponse {
                    res: api
                        .patch_status(&update_status_req.name, &PatchParams::default(), &Patch::Merge(&patch))
                        .await
                        .map_err(|e| kube_error_to_api_error(&e)),
                })
            }
        };
        if resp.is_err() {
            debug!(request = verb, key = %key, "request failed");
        } else {
            debug!(request = verb, key = %key, "request done");
        }
        resp
    }
}

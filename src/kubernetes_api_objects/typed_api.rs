// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{api_method::*, dynamic::KubeResource, error::*};
use crate::shim_layer::api_server::ApiServer;
use std::marker::PhantomData;

/// A typed, namespaced view over an [`ApiServer`], shaped after `kube::Api`.
pub struct TypedApi<'a, K> {
    server: &'a dyn ApiServer,
    namespace: String,
    _kind: PhantomData<K>,
}

impl<'a, K: KubeResource> TypedApi<'a, K> {
    pub fn namespaced(server: &'a dyn ApiServer, namespace: &str) -> TypedApi<'a, K> {
        TypedApi {
            server,
            namespace: namespace.to_string(),
            _kind: PhantomData,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}/{}", K::kind(&()), self.namespace, name)
    }

    pub async fn get(&self, name: &str) -> Result<K, APIRequestError> {
        let req = KubeAPIRequest::GetRequest(KubeGetRequest {
            api_resource: K::api_resource(),
            name: name.to_string(),
            namespace: self.namespace.clone(),
        });
        match self.server.handle(req).await {
            KubeAPIResponse::GetResponse(resp) => self.typed("Get", name, resp.res),
            _ => Err(APIRequestError::new("Get", self.key(name), mismatched_response())),
        }
    }

    /// Like [`TypedApi::get`], but a missing object is Ok(None).
    pub async fn get_opt(&self, name: &str) -> Result<Option<K>, APIRequestError> {
        match self.get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_object_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn list(&self, label_selector: Option<&str>) -> Result<Vec<K>, APIRequestError> {
        let req = KubeListRequest {
            api_resource: K::api_resource(),
            namespace: self.namespace.clone(),
            label_selector: label_selector.map(str::to_string),
        };
        let key = req.key();
        match self.server.handle(KubeAPIRequest::ListRequest(req)).await {
            KubeAPIResponse::ListResponse(resp) => resp
                .res
                .and_then(|objs| objs.into_iter().map(K::unmarshal).collect())
                .map_err(|e| APIRequestError::new("List", key, e)),
            _ => Err(APIRequestError::new("List", key, mismatched_response())),
        }
    }

    pub async fn create(&self, obj: &K) -> Result<K, APIRequestError> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let dyn_obj = obj.marshal().map_err(|e| APIRequestError::new("Create", self.key(&name), e))?;
        let req = KubeAPIRequest::CreateRequest(KubeCreateRequest {
            api_resource: K::api_resource(),
            namespace: self.namespace.clone(),
            obj: dyn_obj,
        });
        match self.server.handle(req).await {
            KubeAPIResponse::CreateResponse(resp) => self.typed("Create", &name, resp.res),
            _ => Err(APIRequestError::new("Create", self.key(&name), mismatched_response())),
        }
    }

    /// Replaces the stored object. The resource version carried by obj is the
    /// precondition of the write.
    pub async fn replace(&self, obj: &K) -> Result<K, APIRequestError> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let dyn_obj = obj.marshal().map_err(|e| APIRequestError::new("Update", self.key(&name), e))?;
        let req = KubeAPIRequest::UpdateRequest(KubeUpdateRequest {
            api_resource: K::api_resource(),
            name: name.clone(),
            namespace: self.namespace.clone(),
            obj: dyn_obj,
        });
        match self.server.handle(req).await {
            KubeAPIResponse::UpdateResponse(resp) => self.typed("Update", &name, resp.res),
            _ => Err(APIRequestError::new("Update", self.key(&name), mismatched_response())),
        }
    }

    pub async fn replace_status(&self, obj: &K) -> Result<K, APIRequestError> {
        let name = obj.meta().name.clone().unwrap_or_default();
        let dyn_obj = obj
            .marshal()
            .map_err(|e| APIRequestError::new("UpdateStatus", self.key(&name), e))?;
        let req = KubeAPIRequest::UpdateStatusRequest(KubeUpdateStatusRequest {
            api_resource: K::api_resource(),
            name: name.clone(),
            namespace: self.namespace.clone(),
            obj: dyn_obj,
        });
        match self.server.handle(req).await {
            KubeAPIResponse::UpdateStatusResponse(resp) => self.typed("UpdateStatus", &name, resp.res),
            _ => Err(APIRequestError::new("UpdateStatus", self.key(&name), mismatched_response())),
        }
    }

    pub async fn delete(&self, name: &str) -> Result<(), APIRequestError> {
        let req = KubeAPIRequest::DeleteRequest(KubeDeleteRequest {
            api_resource: K::api_resource(),
            name: name.to_string(),
            namespace: self.namespace.clone(),
        });
        match self.server.handle(req).await {
            KubeAPIResponse::DeleteResponse(resp) => {
                resp.res.map_err(|e| APIRequestError::new("Delete", self.key(name), e))
            }
            _ => Err(APIRequestError::new("Delete", self.key(name), mismatched_response())),
        }
    }

    /// Deletes the object if it exists. Returns whether a delete was issued.
    pub async fn delete_opt(&self, name: &str) -> Result<bool, APIRequestError> {
        match self.delete(name).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_object_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn typed(
        &self,
        verb: &'static str,
        name: &str,
        res: Result<kube::api::DynamicObject, APIError>,
    ) -> Result<K, APIRequestError> {
        res.and_then(K::unmarshal)
            .map_err(|e| APIRequestError::new(verb, self.key(name), e))
    }
}

fn mismatched_response() -> APIError {
    APIError::Other("response does not match the request".to_string())
}

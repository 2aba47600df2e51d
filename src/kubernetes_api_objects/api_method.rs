// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::common::KubeObjectRef;
use crate::kubernetes_api_objects::error::APIError;
use kube::api::{ApiResource, DynamicObject};

// KubeAPIRequest represents the API requests the controller sends to the Kubernetes API.
//
// kube-rs uses a generic type kube::api::Api as an api handle to send requests,
// so each request carries what is needed to instantiate an Api over DynamicObject
// (the api resource and the namespace) and the arguments of the method to call.
#[derive(Debug, Clone)]
pub enum KubeAPIRequest {
    GetRequest(KubeGetRequest),
    ListRequest(KubeListRequest),
    CreateRequest(KubeCreateRequest),
    DeleteRequest(KubeDeleteRequest),
    UpdateRequest(KubeUpdateRequest),
    UpdateStatusRequest(KubeUpdateStatusRequest),
}

impl KubeAPIRequest {
    pub fn verb(&self) -> &'static str {
        match self {
            KubeAPIRequest::GetRequest(_) => "Get",
            KubeAPIRequest::ListRequest(_) => "List",
            KubeAPIRequest::CreateRequest(_) => "Create",
            KubeAPIRequest::DeleteRequest(_) => "Delete",
            KubeAPIRequest::UpdateRequest(_) => "Update",
            KubeAPIRequest::UpdateStatusRequest(_) => "UpdateStatus",
        }
    }

    pub fn key(&self) -> String {
        match self {
            KubeAPIRequest::GetRequest(req) => req.key(),
            KubeAPIRequest::ListRequest(req) => req.key(),
            KubeAPIRequest::CreateRequest(req) => req.key(),
            KubeAPIRequest::DeleteRequest(req) => req.key(),
            KubeAPIRequest::UpdateRequest(req) => req.key(),
            KubeAPIRequest::UpdateStatusRequest(req) => req.key(),
        }
    }

    // Create, delete, update and update status requests change the cluster state.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, KubeAPIRequest::GetRequest(_) | KubeAPIRequest::ListRequest(_))
    }
}

// KubeGetRequest has the name as the parameter of Api.get(), and namespace to instantiate an Api.
#[derive(Debug, Clone)]
pub struct KubeGetRequest {
    pub api_resource: ApiResource,
    pub name: String,
    pub namespace: String,
}

impl KubeGetRequest {
    pub fn key(&self) -> String {
        self.object_ref().to_string()
    }

    pub fn object_ref(&self) -> KubeObjectRef {
        KubeObjectRef::new(&self.api_resource.kind, &self.namespace, &self.name)
    }
}

// KubeListRequest has the namespace to instantiate an Api and an optional
// equality-based label selector passed through ListParams.
#[derive(Debug, Clone)]
pub struct KubeListRequest {
    pub api_resource: ApiResource,
    pub namespace: String,
    pub label_selector: Option<String>,
}

impl KubeListRequest {
    pub fn key(&self) -> String {
        match &self.label_selector {
            Some(selector) => format!("{}/{}?{}", self.api_resource.kind, self.namespace, selector),
            None => format!("{}/{}", self.api_resource.kind, self.namespace),
        }
    }
}

// KubeCreateRequest has the obj as the parameter of Api.create().
#[derive(Debug, Clone)]
pub struct KubeCreateRequest {
    pub api_resource: ApiResource,
    pub namespace: String,
    pub obj: DynamicObject,
}

impl KubeCreateRequest {
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.api_resource.kind,
            self.namespace,
            self.obj.metadata.name.as_deref().unwrap_or_default()
        )
    }
}

// KubeDeleteRequest has the name as the parameter of Api.delete().
#[derive(Debug, Clone)]
pub struct KubeDeleteRequest {
    pub api_resource: ApiResource,
    pub name: String,
    pub namespace: String,
}

impl KubeDeleteRequest {
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.api_resource.kind, self.namespace, self.name)
    }
}

// KubeUpdateRequest has the obj as the parameter of Api.replace().
// The object carries the resource version it was read at.
#[derive(Debug, Clone)]
pub struct KubeUpdateRequest {
    pub api_resource: ApiResource,
    pub name: String,
    pub namespace: String,
    pub obj: DynamicObject,
}

impl KubeUpdateRequest {
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.api_resource.kind, self.namespace, self.name)
    }
}

// KubeUpdateStatusRequest writes the status subresource of obj.
#[derive(Debug, Clone)]
pub struct KubeUpdateStatusRequest {
    pub api_resource: ApiResource,
    pub name: String,
    pub namespace: String,
    pub obj: DynamicObject,
}

impl KubeUpdateStatusRequest {
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.api_resource.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Clone)]
pub enum KubeAPIResponse {
    GetResponse(KubeGetResponse),
    ListResponse(KubeListResponse),
    CreateResponse(KubeCreateResponse),
    DeleteResponse(KubeDeleteResponse),
    UpdateResponse(KubeUpdateResponse),
    UpdateStatusResponse(KubeUpdateStatusResponse),
}

impl KubeAPIResponse {
    pub fn is_err(&self) -> bool {
        match self {
            KubeAPIResponse::GetResponse(resp) => resp.res.is_err(),
            KubeAPIResponse::ListResponse(resp) => resp.res.is_err(),
            KubeAPIResponse::CreateResponse(resp) => resp.res.is_err(),
            KubeAPIResponse::DeleteResponse(resp) => resp.res.is_err(),
            KubeAPIResponse::UpdateResponse(resp) => resp.res.is_err(),
            KubeAPIResponse::UpdateStatusResponse(resp) => resp.res.is_err(),
        }
    }

    // Builds the response a request would get if it failed with error.
    pub fn error_for(req: &KubeAPIRequest, error: APIError) -> KubeAPIResponse {
        match req {
            KubeAPIRequest::GetRequest(_) => KubeAPIResponse::GetResponse(KubeGetResponse { res: Err(error) }),
            KubeAPIRequest::ListRequest(_) => KubeAPIResponse::ListResponse(KubeListResponse { res: Err(error) }),
            KubeAPIRequest::CreateRequest(_) => {
                KubeAPIResponse::CreateResponse(KubeCreateResponse { res: Err(error) })
            }
            KubeAPIRequest::DeleteRequest(_) => {
                KubeAPIResponse::DeleteResponse(KubeDeleteResponse { res: Err(error) })
            }
            KubeAPIRequest::UpdateRequest(_) => {
                KubeAPIResponse::UpdateResponse(KubeUpdateResponse { res: Err(error) })
            }
            KubeAPIRequest::UpdateStatusRequest(_) => {
                KubeAPIResponse::UpdateStatusResponse(KubeUpdateStatusResponse { res: Err(error) })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct KubeGetResponse {
    pub res: Result<DynamicObject, APIError>,
}

#[derive(Debug, Clone)]
pub struct KubeListResponse {
    pub res: Result<Vec<DynamicObject>, APIError>,
}

#[derive(Debug, Clone)]
pub struct KubeCreateResponse {
    pub res: Result<DynamicObject, APIError>,
}

#[derive(Debug, Clone)]
pub struct KubeDeleteResponse {
    pub res: Result<(), APIError>,
}

#[derive(Debug, Clone)]
pub struct KubeUpdateResponse {
    pub res: Result<DynamicObject, APIError>,
}

#[derive(Debug, Clone)]
pub struct KubeUpdateStatusResponse {
    pub res: Result<DynamicObject, APIError>,
}

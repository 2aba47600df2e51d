// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::executable_model::api_server_state::ApiServerState;
use crate::kubernetes_api_objects::{
    api_method::*,
    common::{parse_label_selector, KubeObjectRef},
    dynamic::KubeResource,
    error::APIError,
};
use crate::shim_layer::api_server::ApiServer;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{ApiResource, DynamicObject};
use parking_lot::Mutex;
use std::collections::BTreeSet;

// ExecutableApiServer is an in-memory API server that follows the request handling
// rules of the Kubernetes API server the controller relies on: optimistic concurrency
// on resource versions, generations, finalizer-aware deletion, status-only updates,
// no-op updates that keep the resource version, and owner-reference based garbage
// collection.
//
// It lets the reconciler run end to end without a cluster.
pub struct ExecutableApiServer {
    state: Mutex<ApiServerState>,
    injected_errors: Mutex<Vec<InjectedError>>,
}

// An error returned instead of handling matching requests.
#[derive(Debug, Clone)]
struct InjectedError {
    verb: &'static str,
    kind: String,
    name: Option<String>,
    error: APIError,
}

impl InjectedError {
    fn matches(&self, req: &KubeAPIRequest) -> bool {
        if self.verb != req.verb() {
            return false;
        }
        let (kind, name) = match req {
            KubeAPIRequest::GetRequest(r) => (&r.api_resource.kind, Some(r.name.as_str())),
            KubeAPIRequest::ListRequest(r) => (&r.api_resource.kind, None),
            KubeAPIRequest::CreateRequest(r) => (&r.api_resource.kind, r.obj.metadata.name.as_deref()),
            KubeAPIRequest::DeleteRequest(r) => (&r.api_resource.kind, Some(r.name.as_str())),
            KubeAPIRequest::UpdateRequest(r) => (&r.api_resource.kind, Some(r.name.as_str())),
            KubeAPIRequest::UpdateStatusRequest(r) => (&r.api_resource.kind, Some(r.name.as_str())),
        };
        &self.kind == kind
            && match (&self.name, name) {
                (None, _) => true,
                (Some(expected), Some(actual)) => expected == actual,
                (Some(_), None) => false,
            }
    }
}

impl Default for ExecutableApiServer {
    fn default() -> ExecutableApiServer {
        ExecutableApiServer::new()
    }
}

impl ExecutableApiServer {
    pub fn new() -> ExecutableApiServer {
        ExecutableApiServer {
            state: Mutex::new(ApiServerState::new()),
            injected_errors: Mutex::new(Vec::new()),
        }
    }

    /// Every successful write bumps the resource version counter, so the counter
    /// tells how many times the stored state changed.
    pub fn resource_version_counter(&self) -> i64 {
        self.state.lock().resource_version_counter
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().resources.len()
    }

    pub fn object_refs(&self) -> Vec<KubeObjectRef> {
        self.state.lock().resources.keys().cloned().collect()
    }

    pub fn get_object<K: KubeResource>(&self, namespace: &str, name: &str) -> Option<K> {
        let key = KubeObjectRef::new(K::kind(&()), namespace, name);
        let obj = self.state.lock().resources.get(&key).cloned()?;
        K::unmarshal(obj).ok()
    }

    /// Makes requests matching verb, kind and (if given) name fail with error.
    pub fn inject_error(&self, verb: &'static str, kind: &str, name: Option<&str>, error: APIError) {
        self.injected_errors.lock().push(InjectedError {
            verb,
            kind: kind.to_string(),
            name: name.map(str::to_string),
            error,
        });
    }

    pub fn clear_injected_errors(&self) {
        self.injected_errors.lock().clear();
    }

    /// Stores obj as if another client created it, bypassing admission checks.
    pub fn insert_object<K: KubeResource>(&self, namespace: &str, obj: &K) -> Result<K, APIError> {
        let mut dyn_obj = obj.marshal()?;
        let mut s = self.state.lock();
        dyn_obj.metadata.namespace = Some(namespace.to_string());
        dyn_obj.metadata.resource_version = Some(s.resource_version_counter.to_string());
        dyn_obj.metadata.uid = Some(format!("uid-{}", s.uid_counter));
        let key = KubeObjectRef::new(K::kind(&()), namespace, dyn_obj.metadata.name.clone().unwrap_or_default());
        s.resources.insert(key, dyn_obj.clone());
        s.uid_counter += 1;
        s.resource_version_counter += 1;
        K::unmarshal(dyn_obj)
    }

    /// Applies f to the stored object as another actor would (an external client,
    /// a built-in controller or the kubelet), bumping its resource version.
    pub fn mutate_object<K: KubeResource>(
        &self,
        namespace: &str,
        name: &str,
        f: impl FnOnce(&mut K),
    ) -> Result<K, APIError> {
        let key = KubeObjectRef::new(K::kind(&()), namespace, name);
        let mut s = self.state.lock();
        let stored = s.resources.get(&key).cloned().ok_or(APIError::ObjectNotFound)?;
        let mut typed = K::unmarshal(stored)?;
        f(&mut typed);
        let mut dyn_obj = typed.marshal()?;
        dyn_obj.metadata.resource_version = Some(s.resource_version_counter.to_string());
        s.resources.insert(key, dyn_obj.clone());
        s.resource_version_counter += 1;
        K::unmarshal(dyn_obj)
    }

    fn handle_get_request(req: &KubeGetRequest, s: &ApiServerState) -> KubeGetResponse {
        match s.resources.get(&req.object_ref()) {
            Some(obj) => KubeGetResponse { res: Ok(obj.clone()) },
            None => KubeGetResponse {
                res: Err(APIError::ObjectNotFound),
            },
        }
    }

    fn handle_list_request(req: &KubeListRequest, s: &ApiServerState) -> KubeListResponse {
        let selector = match &req.label_selector {
            Some(selector) => match parse_label_selector(selector) {
                Some(terms) => terms,
                None => return KubeListResponse { res: Err(APIError::BadRequest) },
            },
            None => Vec::new(),
        };
        let items = s
            .resources
            .iter()
            .filter(|(key, _)| key.kind == req.api_resource.kind && key.namespace == req.namespace)
            .filter(|(_, obj)| {
                selector.iter().all(|(k, v)| {
                    obj.metadata
                        .labels
                        .as_ref()
                        .and_then(|labels| labels.get(k))
                        .map_or(false, |actual| actual == v)
                })
            })
            .map(|(_, obj)| obj.clone())
            .collect();
        KubeListResponse { res: Ok(items) }
    }

    fn metadata_validity_check(obj: &DynamicObject) -> Option<APIError> {
        let controller_refs = obj
            .metadata
            .owner_references
            .as_ref()
            .map_or(0, |refs| refs.iter().filter(|r| r.controller == Some(true)).count());
        if controller_refs > 1 {
            Some(APIError::Invalid)
        } else {
            None
        }
    }

    fn metadata_transition_validity_check(obj: &DynamicObject, old_obj: &DynamicObject) -> Option<APIError> {
        let old_finalizers: BTreeSet<&String> = old_obj.metadata.finalizers.iter().flatten().collect();
        let adds_finalizer = obj
            .metadata
            .finalizers
            .iter()
            .flatten()
            .any(|f| !old_finalizers.contains(f));
        if old_obj.metadata.deletion_timestamp.is_some() && adds_finalizer {
            Some(APIError::Forbidden)
        } else {
            None
        }
    }

    fn handle_create_request(req: &KubeCreateRequest, s: &mut ApiServerState) -> KubeCreateResponse {
        let name = match &req.obj.metadata.name {
            Some(name) => name.clone(),
            None => return KubeCreateResponse { res: Err(APIError::Invalid) },
        };
        if req.obj.metadata.namespace.as_ref().map_or(false, |ns| ns != &req.namespace) {
            return KubeCreateResponse { res: Err(APIError::BadRequest) };
        }
        let key = KubeObjectRef::new(&req.api_resource.kind, &req.namespace, name);
        if s.resources.contains_key(&key) {
            return KubeCreateResponse {
                res: Err(APIError::ObjectAlreadyExists),
            };
        }
        let mut created_obj = req.obj.clone();
        created_obj.metadata.namespace = Some(req.namespace.clone());
        created_obj.metadata.resource_version = Some(s.resource_version_counter.to_string());
        created_obj.metadata.uid = Some(format!("uid-{}", s.uid_counter));
        created_obj.metadata.deletion_timestamp = None;
        created_obj.metadata.generation = Some(1);
        // The status is not writable through create.
        if let Some(data) = created_obj.data.as_object_mut() {
            data.remove("status");
        }
        if let Some(err) = Self::metadata_validity_check(&created_obj) {
            return KubeCreateResponse { res: Err(err) };
        }
        s.resources.insert(key, created_obj.clone());
        s.uid_counter += 1;
        s.resource_version_counter += 1;
        KubeCreateResponse { res: Ok(created_obj) }
    }

    fn handle_delete_request(req: &KubeDeleteRequest, s: &mut ApiServerState) -> KubeDeleteResponse {
        let key = KubeObjectRef::new(&req.api_resource.kind, &req.namespace, &req.name);
        KubeDeleteResponse {
            res: Self::delete_object(&key, s),
        }
    }

    fn delete_object(key: &KubeObjectRef, s: &mut ApiServerState) -> Result<(), APIError> {
        let mut obj = s.resources.get(key).cloned().ok_or(APIError::ObjectNotFound)?;
        if obj.metadata.finalizers.as_ref().map_or(false, |f| !f.is_empty()) {
            if obj.metadata.deletion_timestamp.is_none() {
                obj.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                obj.metadata.resource_version = Some(s.resource_version_counter.to_string());
                s.resources.insert(key.clone(), obj);
                s.resource_version_counter += 1;
            }
        } else {
            Self::remove_object(key, s);
            s.resource_version_counter += 1;
        }
        Ok(())
    }

    // Removes the object and garbage collects every object it owns.
    fn remove_object(key: &KubeObjectRef, s: &mut ApiServerState) {
        let Some(removed) = s.resources.remove(key) else {
            return;
        };
        let Some(uid) = removed.metadata.uid else {
            return;
        };
        let dependents: Vec<KubeObjectRef> = s
            .resources
            .iter()
            .filter(|(_, obj)| {
                obj.metadata
                    .owner_references
                    .iter()
                    .flatten()
                    .any(|owner| owner.uid == uid)
            })
            .map(|(key, _)| key.clone())
            .collect();
        for dependent in dependents {
            // Best effort, as the garbage collector does.
            let _ = Self::delete_object(&dependent, s);
        }
    }

    // Custom resources reject updates that do not carry a resource version.
    fn allow_unconditional_update(api_resource: &ApiResource) -> bool {
        matches!(api_resource.group.as_str(), "" | "apps" | "batch") || api_resource.group.ends_with(".k8s.io")
    }

    fn update_request_admission_check(
        api_resource: &ApiResource,
        name: &str,
        namespace: &str,
        obj: &DynamicObject,
        s: &ApiServerState,
    ) -> Result<DynamicObject, APIError> {
        match &obj.metadata.name {
            None => return Err(APIError::BadRequest),
            Some(obj_name) if obj_name != name => return Err(APIError::BadRequest),
            _ => {}
        }
        if obj.metadata.namespace.as_ref().map_or(false, |ns| ns != namespace) {
            return Err(APIError::BadRequest);
        }
        let key = KubeObjectRef::new(&api_resource.kind, namespace, name);
        let old_obj = s.resources.get(&key).ok_or(APIError::ObjectNotFound)?;
        match &obj.metadata.resource_version {
            None if !Self::allow_unconditional_update(api_resource) => return Err(APIError::Invalid),
            Some(rv) if Some(rv) != old_obj.metadata.resource_version.as_ref() => return Err(APIError::Conflict),
            _ => {}
        }
        if obj.metadata.uid.is_some() && obj.metadata.uid != old_obj.metadata.uid {
            return Err(APIError::InternalError);
        }
        Ok(old_obj.clone())
    }

    fn handle_update_request(req: &KubeUpdateRequest, s: &mut ApiServerState) -> KubeUpdateResponse {
        let old_obj =
            match Self::update_request_admission_check(&req.api_resource, &req.name, &req.namespace, &req.obj, s) {
                Ok(old_obj) => old_obj,
                Err(err) => return KubeUpdateResponse { res: Err(err) },
            };
        let key = KubeObjectRef::new(&req.api_resource.kind, &req.namespace, &req.name);
        let mut updated_obj = req.obj.clone();
        updated_obj.metadata.namespace = Some(req.namespace.clone());
        updated_obj.metadata.resource_version = old_obj.metadata.resource_version.clone();
        updated_obj.metadata.uid = old_obj.metadata.uid.clone();
        updated_obj.metadata.deletion_timestamp = old_obj.metadata.deletion_timestamp.clone();
        // The status is only writable through the status subresource.
        if let Some(data) = updated_obj.data.as_object_mut() {
            match old_obj.data.get("status") {
                Some(status) => data.insert("status".to_string(), status.clone()),
                None => data.remove("status"),
            };
        }
        // The generation only moves when something other than metadata changes.
        updated_obj.metadata.generation = if updated_obj.data != old_obj.data {
            Some(old_obj.metadata.generation.unwrap_or(0) + 1)
        } else {
            old_obj.metadata.generation
        };
        if same_object(&updated_obj, &old_obj) {
            return KubeUpdateResponse { res: Ok(old_obj) };
        }
        updated_obj.metadata.resource_version = Some(s.resource_version_counter.to_string());
        if let Some(err) = Self::metadata_validity_check(&updated_obj)
            .or_else(|| Self::metadata_transition_validity_check(&updated_obj, &old_obj))
        {
            return KubeUpdateResponse { res: Err(err) };
        }
        let finalizers_empty = updated_obj.metadata.finalizers.as_ref().map_or(true, |f| f.is_empty());
        if updated_obj.metadata.deletion_timestamp.is_some() && finalizers_empty {
            Self::remove_object(&key, s);
        } else {
            s.resources.insert(key, updated_obj.clone());
        }
        s.resource_version_counter += 1;
        KubeUpdateResponse { res: Ok(updated_obj) }
    }

    fn handle_update_status_request(req: &KubeUpdateStatusRequest, s: &mut ApiServerState) -> KubeUpdateStatusResponse {
        let old_obj =
            match Self::update_request_admission_check(&req.api_resource, &req.name, &req.namespace, &req.obj, s) {
                Ok(old_obj) => old_obj,
                Err(err) => return KubeUpdateStatusResponse { res: Err(err) },
            };
        let key = KubeObjectRef::new(&req.api_resource.kind, &req.namespace, &req.name);
        // Everything but the status comes from the stored object.
        let mut updated_obj = old_obj.clone();
        if let Some(data) = updated_obj.data.as_object_mut() {
            match req.obj.data.get("status") {
                Some(status) => data.insert("status".to_string(), status.clone()),
                None => data.remove("status"),
            };
        }
        if same_object(&updated_obj, &old_obj) {
            return KubeUpdateStatusResponse { res: Ok(old_obj) };
        }
        updated_obj.metadata.resource_version = Some(s.resource_version_counter.to_string());
        s.resources.insert(key, updated_obj.clone());
        s.resource_version_counter += 1;
        KubeUpdateStatusResponse { res: Ok(updated_obj) }
    }
}

#[async_trait]
impl ApiServer for ExecutableApiServer {
    async fn handle(&self, req: KubeAPIRequest) -> KubeAPIResponse {
        if let Some(injected) = self.injected_errors.lock().iter().find(|e| e.matches(&req)) {
            return KubeAPIResponse::error_for(&req, injected.error.clone());
        }
        let mut s = self.state.lock();
        match &req {
            KubeAPIRequest::GetRequest(get_req) => KubeAPIResponse::GetResponse(Self::handle_get_request(get_req, &s)),
            KubeAPIRequest::ListRequest(list_req) => {
                KubeAPIResponse::ListResponse(Self::handle_list_request(list_req, &s))
            }
            KubeAPIRequest::CreateRequest(create_req) => {
                KubeAPIResponse::CreateResponse(Self::handle_create_request(create_req, &mut s))
            }
            KubeAPIRequest::DeleteRequest(delete_req) => {
                KubeAPIResponse::DeleteResponse(Self::handle_delete_request(delete_req, &mut s))
            }
            KubeAPIRequest::UpdateRequest(update_req) => {
                KubeAPIResponse::UpdateResponse(Self::handle_update_request(update_req, &mut s))
            }
            KubeAPIRequest::UpdateStatusRequest(update_status_req) => {
                KubeAPIResponse::UpdateStatusResponse(Self::handle_update_status_request(update_status_req, &mut s))
            }
        }
    }
}

fn same_object(a: &DynamicObject, b: &DynamicObject) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

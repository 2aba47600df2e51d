// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::error::APIError;
use kube::api::{ApiResource, DynamicObject, TypeMeta};
use kube::Resource;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// A typed Kubernetes object that can travel through the API server shim as a
/// [`DynamicObject`].
pub trait KubeResource:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn api_resource() -> ApiResource {
        ApiResource::erase::<Self>(&())
    }

    fn marshal(&self) -> Result<DynamicObject, APIError> {
        let mut obj: DynamicObject =
            serde_json::from_value(serde_json::to_value(self).map_err(|e| APIError::MarshalFailed(e.to_string()))?)
                .map_err(|e| APIError::MarshalFailed(e.to_string()))?;
        obj.types = Some(Self::type_meta());
        Ok(obj)
    }

    fn unmarshal(mut obj: DynamicObject) -> Result<Self, APIError> {
        // typed objects refuse to deserialize without a matching apiVersion and kind
        obj.types = Some(Self::type_meta());
        serde_json::to_value(obj)
            .and_then(serde_json::from_value)
            .map_err(|e| APIError::MarshalFailed(e.to_string()))
    }

    fn type_meta() -> TypeMeta {
        TypeMeta {
            api_version: Self::api_version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
        }
    }
}

impl<K> KubeResource for K where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}


// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::common::KubeObjectRef;
use kube::api::DynamicObject;
use std::collections::BTreeMap;

// ObjectMap stores the objects of the in-memory API server keyed by
// kind, namespace and name, ordered so that listings are deterministic.
#[derive(Debug, Clone, Default)]
pub struct ObjectMap {
    inner: BTreeMap<KubeObjectRef, DynamicObject>,
}

impl ObjectMap {
    pub fn new() -> ObjectMap {
        ObjectMap { inner: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains_key(&self, key: &KubeObjectRef) -> bool {
        self.inner.contains_key(key)
    }

    pub fn get(&self, key: &KubeObjectRef) -> Option<&DynamicObject> {
        self.inner.get(key)
    }

    pub fn insert(&mut self, key: KubeObjectRef, value: DynamicObject) -> Option<DynamicObject> {
        self.inner.insert(key, value)
    }

    pub fn remove(&mut self, key: &KubeObjectRef) -> Option<DynamicObject> {
        self.inner.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KubeObjectRef, &DynamicObject)> {
        self.inner.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &KubeObjectRef> {
        self.inner.keys()
    }
}

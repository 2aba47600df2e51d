// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod astarte_service;
pub mod cassandra;
pub mod cfssl;
pub mod common;
pub mod dashboard;
pub mod erlang_configuration;
pub mod housekeeping_key;
pub mod rabbitmq;
pub mod vernemq;

use crate::astarte_controller::common::astarte_namespace;
use crate::astarte_controller::exec::plan::ConvergenceStep;
use crate::astarte_controller::trusted::spec_types::Astarte;
use crate::kubernetes_api_objects::{dynamic::KubeResource, error::APIRequestError, typed_api::TypedApi};
use crate::shim_layer::controller_runtime::Data;
use crate::Error;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::ObjectMeta;
use tracing::info;

const MAX_CONFLICT_RETRIES: usize = 3;

/// Converge writes the fields the controller owns from a freshly built object
/// into the stored one, leaving everything else as found.
pub trait Converge: KubeResource + PartialEq {
    fn converge_from(&mut self, desired: &Self);
}

fn converge_metadata(meta: &mut ObjectMeta, desired: &ObjectMeta) {
    if let Some(labels) = &desired.labels {
        meta.labels.get_or_insert_with(Default::default).extend(labels.clone());
    }
    if let Some(annotations) = &desired.annotations {
        meta.annotations
            .get_or_insert_with(Default::default)
            .extend(annotations.clone());
    }
    if desired.owner_references.is_some() {
        meta.owner_references = desired.owner_references.clone();
    }
}

impl Converge for ConfigMap {
    fn converge_from(&mut self, desired: &ConfigMap) {
        converge_metadata(&mut self.metadata, &desired.metadata);
        self.data = desired.data.clone();
        self.binary_data = desired.binary_data.clone();
    }
}

impl Converge for Secret {
    fn converge_from(&mut self, desired: &Secret) {
        converge_metadata(&mut self.metadata, &desired.metadata);
        self.data = desired.data.clone();
        self.type_ = desired.type_.clone();
    }
}

impl Converge for Service {
    fn converge_from(&mut self, desired: &Service) {
        converge_metadata(&mut self.metadata, &desired.metadata);
        // The allocated cluster IP is immutable.
        let (cluster_ip, cluster_ips) = match &self.spec {
            Some(spec) => (spec.cluster_ip.clone(), spec.cluster_ips.clone()),
            None => (None, None),
        };
        let mut spec = desired.spec.clone();
        if let Some(spec) = spec.as_mut() {
            if cluster_ip.is_some() {
                spec.cluster_ip = cluster_ip;
                spec.cluster_ips = cluster_ips;
            }
        }
        self.spec = spec;
    }
}

impl Converge for ServiceAccount {
    fn converge_from(&mut self, desired: &ServiceAccount) {
        converge_metadata(&mut self.metadata, &desired.metadata);
    }
}

impl Converge for Role {
    fn converge_from(&mut self, desired: &Role) {
        converge_metadata(&mut self.metadata, &desired.metadata);
        self.rules = desired.rules.clone();
    }
}

impl Converge for RoleBinding {
    fn converge_from(&mut self, desired: &RoleBinding) {
        converge_metadata(&mut self.metadata, &desired.metadata);
        self.role_ref = desired.role_ref.clone();
        self.subjects = desired.subjects.clone();
    }
}

impl Converge for Deployment {
    fn converge_from(&mut self, desired: &Deployment) {
        converge_metadata(&mut self.metadata, &desired.metadata);
        match (self.spec.as_mut(), desired.spec.as_ref()) {
            // The selector is immutable; fields left unset belong to the server defaults.
            (Some(spec), Some(desired_spec)) => {
                spec.replicas = desired_spec.replicas;
                spec.template = desired_spec.template.clone();
                if desired_spec.strategy.is_some() {
                    spec.strategy = desired_spec.strategy.clone();
                }
            }
            _ => self.spec = desired.spec.clone(),
        }
    }
}

impl Converge for StatefulSet {
    fn converge_from(&mut self, desired: &StatefulSet) {
        converge_metadata(&mut self.metadata, &desired.metadata);
        match (self.spec.as_mut(), desired.spec.as_ref()) {
            // Only these fields of a StatefulSet spec can be updated.
            (Some(spec), Some(desired_spec)) => {
                spec.replicas = desired_spec.replicas;
                spec.template = desired_spec.template.clone();
                spec.update_strategy = desired_spec.update_strategy.clone();
                spec.persistent_volume_claim_retention_policy =
                    desired_spec.persistent_volume_claim_retention_policy.clone();
            }
            _ => self.spec = desired.spec.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

/// Creates desired, or converges the stored object towards it. Nothing is written
/// when the stored object already matches. A conflicting concurrent write makes it
/// read the object again and retry.
pub async fn create_or_update<K: Converge>(api: &TypedApi<'_, K>, desired: &K) -> Result<Outcome, APIRequestError> {
    create_or_update_with(api, desired, |found, desired| found.converge_from(desired)).await
}

/// Creates desired if missing; an existing object only gets its metadata converged.
pub async fn create_or_adopt<K: Converge>(api: &TypedApi<'_, K>, desired: &K) -> Result<Outcome, APIRequestError> {
    create_or_update_with(api, desired, |found, desired| {
        converge_metadata(found.meta_mut(), desired.meta())
    })
    .await
}

async fn create_or_update_with<K, F>(api: &TypedApi<'_, K>, desired: &K, mutate: F) -> Result<Outcome, APIRequestError>
where
    K: Converge,
    F: Fn(&mut K, &K),
{
    let name = desired.meta().name.clone().unwrap_or_default();
    let kind = K::kind(&());
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match api.get_opt(&name).await? {
            None => api.create(desired).await.map(|_| Outcome::Created),
            Some(found) => {
                let mut updated = found.clone();
                mutate(&mut updated, desired);
                if updated == found {
                    return Ok(Outcome::Unchanged);
                }
                api.replace(&updated).await.map(|_| Outcome::Updated)
            }
        };
        match result {
            Ok(outcome) => {
                info!(kind = %kind, name = %name, namespace = %api.namespace(), ?outcome, "converged object");
                return Ok(outcome);
            }
            Err(e) if (e.is_conflict() || e.is_object_already_exists()) && attempt < MAX_CONFLICT_RETRIES => {
                info!(kind = %kind, name = %name, attempt, "concurrent write detected, retrying: {}", e);
            }
            Err(e) => return Err(e),
        }
    }
}

/// An object that lives next to a component's workload.
#[derive(Debug, Clone)]
pub enum Companion {
    ConfigMap(ConfigMap),
    Secret(Secret),
    /// A secret holding generated material: created once, its data never rewritten.
    GeneratedSecret(Secret),
    Service(Service),
    ServiceAccount(ServiceAccount),
    Role(Role),
    RoleBinding(RoleBinding),
    /// A secret the instance must not carry, such as credentials that moved to a user secret.
    AbsentSecret(String),
}

impl Companion {
    pub async fn apply(&self, namespace: &str, ctx: &Data) -> Result<(), APIRequestError> {
        let server = ctx.api.as_ref();
        match self {
            Companion::ConfigMap(obj) => {
                create_or_update(&TypedApi::namespaced(server, namespace), obj).await?;
            }
            Companion::Secret(obj) => {
                create_or_update(&TypedApi::namespaced(server, namespace), obj).await?;
            }
            Companion::GeneratedSecret(obj) => {
                create_or_adopt(&TypedApi::namespaced(server, namespace), obj).await?;
            }
            Companion::Service(obj) => {
                create_or_update(&TypedApi::namespaced(server, namespace), obj).await?;
            }
            Companion::ServiceAccount(obj) => {
                create_or_update(&TypedApi::namespaced(server, namespace), obj).await?;
            }
            Companion::Role(obj) => {
                create_or_update(&TypedApi::namespaced(server, namespace), obj).await?;
            }
            Companion::RoleBinding(obj) => {
                create_or_update(&TypedApi::namespaced(server, namespace), obj).await?;
            }
            Companion::AbsentSecret(name) => {
                TypedApi::<Secret>::namespaced(server, namespace).delete_opt(name).await?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Workload {
    Deployment(Deployment),
    StatefulSet(StatefulSet),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

/// ComponentBuilder describes one deployable piece of the cluster: its primary
/// workload and the objects around it.
pub trait ComponentBuilder: Send + Sync {
    fn name(&self) -> String;

    fn workload_name(&self, astarte: &Astarte) -> String;

    fn workload_kind(&self) -> WorkloadKind;

    fn deploy(&self, astarte: &Astarte) -> bool;

    fn validate(&self, _astarte: &Astarte) -> Result<(), Error> {
        Ok(())
    }

    fn companions(&self, astarte: &Astarte) -> Result<Vec<Companion>, Error>;

    fn make_workload(&self, astarte: &Astarte) -> Result<Workload, Error>;
}

/// Brings one component in line with the instance: companions first, then the
/// workload. A component that is not to be deployed only loses its workload; the
/// companions it already has are left to cascade deletion.
pub async fn ensure<B: ComponentBuilder + ?Sized>(builder: &B, astarte: &Astarte, ctx: &Data) -> Result<(), Error> {
    builder.validate(astarte)?;
    let namespace = astarte_namespace(astarte);
    for companion in builder.companions(astarte)? {
        companion.apply(&namespace, ctx).await?;
    }

    let server = ctx.api.as_ref();
    if !builder.deploy(astarte) {
        let name = builder.workload_name(astarte);
        let deleted = match builder.workload_kind() {
            WorkloadKind::Deployment => TypedApi::<Deployment>::namespaced(server, &namespace).delete_opt(&name).await?,
            WorkloadKind::StatefulSet => {
                TypedApi::<StatefulSet>::namespaced(server, &namespace)
                    .delete_opt(&name)
                    .await?
            }
        };
        if deleted {
            info!(component = %builder.name(), name = %name, "component is not to be deployed, deleted its workload");
        }
        return Ok(());
    }

    match builder.make_workload(astarte)? {
        Workload::Deployment(deployment) => {
            create_or_update(&TypedApi::namespaced(server, &namespace), &deployment).await?;
        }
        Workload::StatefulSet(stateful_set) => {
            create_or_update(&TypedApi::namespaced(server, &namespace), &stateful_set).await?;
        }
    }
    Ok(())
}

/// Runs a [`ComponentBuilder`] as a step of the convergence plan.
pub struct ComponentStep<B>(pub B);

#[async_trait]
impl<B: ComponentBuilder> ConvergenceStep for ComponentStep<B> {
    fn name(&self) -> String {
        self.0.name()
    }

    async fn ensure(&self, astarte: &Astarte, ctx: &Data) -> Result<(), Error> {
        ensure(&self.0, astarte, ctx).await
    }
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(group = "api.astarte-platform.org", version = "v1alpha1", kind = "Astarte")]
#[kube(shortname = "astarte", namespaced, status = "AstarteStatus")]
#[kube(printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.astarteVersion"}"#)]
#[kube(printcolumn = r#"{"name":"Health","type":"string","jsonPath":".status.health"}"#)]
#[serde(rename_all = "camelCase")]
pub struct AstarteSpec {
    /// The Astarte version to deploy, as a semantic version.
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secrets: Option<Vec<corev1::LocalObjectReference>>,
    /// The organisation images are pulled from. Defaults to `astarte`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_strategy: Option<appsv1::DeploymentStrategy>,
    /// Whether to create RBAC objects for the components needing them. Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rbac: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    pub api: AstarteApiSpec,
    #[serde(default)]
    pub rabbitmq: AstarteRabbitMqSpec,
    #[serde(default)]
    pub cassandra: AstarteCassandraSpec,
    #[serde(default)]
    pub vernemq: AstarteVerneMqSpec,
    #[serde(default)]
    pub cfssl: AstarteCfsslSpec,
    #[serde(default)]
    pub components: AstarteComponentsSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AstarteApiSpec {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<bool>,
}

/// The knobs shared by every deployable piece of the cluster.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AstarteGenericClusteredResource {
    /// Set to false to not deploy the resource and remove it if present. Defaults to true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anti_affinity: Option<bool>,
    /// Overrides the image, tag included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Overrides the image tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AstartePersistentStorageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginCredentialsSecret {
    pub name: String,
    pub username_key: String,
    pub password_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AstarteRabbitMqConnectionSpec {
    #[serde(default)]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<LoginCredentialsSecret>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AstarteRabbitMqSpec {
    #[serde(flatten)]
    pub generic: AstarteGenericClusteredResource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<AstarteRabbitMqConnectionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<AstartePersistentStorageSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_plugins: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AstarteCassandraSpec {
    #[serde(flatten)]
    pub generic: AstarteGenericClusteredResource,
    /// Comma separated `host:port` list, compulsory when Cassandra is not deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_heap_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heap_new_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<AstartePersistentStorageSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AstarteCfsslSpec {
    #[serde(flatten)]
    pub generic: AstarteGenericClusteredResource,
    /// URL of an external CFSSL, compulsory when CFSSL is not deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_expiry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_expiry: Option<String>,
    /// A secret holding the CA certificate and key, used instead of a generated CA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_secret: Option<corev1::LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<AstartePersistentStorageSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AstarteVerneMqSpec {
    #[serde(flatten)]
    pub generic: AstarteGenericClusteredResource,
    #[serde(default)]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<AstartePersistentStorageSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AstarteGenericApiSpec {
    #[serde(flatten)]
    pub generic: AstarteGenericClusteredResource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_authentication: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AstarteGenericComponentSpec {
    #[serde(default)]
    pub api: AstarteGenericApiSpec,
    #[serde(default)]
    pub backend: AstarteGenericClusteredResource,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AstarteDataUpdaterPlantSpec {
    #[serde(flatten)]
    pub generic: AstarteGenericClusteredResource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefetch_count: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AstarteDashboardConfigAuthSpec {
    #[serde(rename = "type")]
    pub auth_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_api_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AstarteDashboardSpec {
    #[serde(flatten)]
    pub generic: AstarteGenericClusteredResource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm_management_api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_realm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_auth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Vec<AstarteDashboardConfigAuthSpec>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AstarteComponentsSpec {
    /// Resources shared by every component not setting its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<corev1::ResourceRequirements>,
    #[serde(default)]
    pub housekeeping: AstarteGenericComponentSpec,
    #[serde(default)]
    pub realm_management: AstarteGenericComponentSpec,
    #[serde(default)]
    pub pairing: AstarteGenericComponentSpec,
    #[serde(default)]
    pub data_updater_plant: AstarteDataUpdaterPlantSpec,
    #[serde(default)]
    pub trigger_engine: AstarteGenericClusteredResource,
    #[serde(default, rename = "appengineApi")]
    pub appengine_api: AstarteGenericApiSpec,
    #[serde(default)]
    pub dashboard: AstarteDashboardSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ReconciliationPhase {
    Reconciling,
    Reconciled,
    Failed,
    Upgrading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AstarteClusterHealth {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct AstarteStatus {
    #[serde(rename = "astarteVersion", default)]
    pub astarte_version: String,
    #[serde(rename = "operatorVersion", default)]
    pub operator_version: String,
    #[serde(rename = "reconciliationPhase", default, skip_serializing_if = "Option::is_none")]
    pub reconciliation_phase: Option<ReconciliationPhase>,
    #[serde(rename = "health", default, skip_serializing_if = "Option::is_none")]
    pub health: Option<AstarteClusterHealth>,
    #[serde(rename = "baseAPIURL", default)]
    pub base_api_url: String,
    #[serde(rename = "brokerURL", default)]
    pub broker_url: String,
}

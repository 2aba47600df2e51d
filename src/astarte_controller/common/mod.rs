// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::trusted::spec_types::*;
use std::collections::BTreeMap;
use std::fmt;

pub const ASTARTE_FINALIZER: &str = "finalizer.astarte.astarte-platform.org";

/// Versions the controller knows how to deploy and upgrade.
pub const SUPPORTED_VERSION_CONSTRAINT: &str = ">=0.10.0, <0.12.0";

/// Carried by every Astarte micro-service Deployment; the health aggregator lists by it.
pub const COMPONENT_LABEL_KEY: &str = "component";
pub const COMPONENT_LABEL_VALUE: &str = "astarte";
pub const ASTARTE_COMPONENT_LABEL_KEY: &str = "astarte-component";
pub const APP_LABEL_KEY: &str = "app";

pub const DEFAULT_DISTRIBUTION_CHANNEL: &str = "astarte";
pub const DEFAULT_BROKER_PORT: i32 = 8883;
pub const SNAPSHOT_VERSION: &str = "snapshot";

pub const HOUSEKEEPING_PRIVATE_KEY: &str = "private-key";
pub const HOUSEKEEPING_PUBLIC_KEY: &str = "public-key";

pub const RABBITMQ_DEFAULT_USERNAME: &str = "astarte-admin";
pub const RABBITMQ_USERNAME_KEY: &str = "admin-username";
pub const RABBITMQ_PASSWORD_KEY: &str = "admin-password";
pub const RABBITMQ_COOKIE_KEY: &str = "erlang-cookie";

pub const CFSSL_CA_CERTIFICATE_KEY: &str = "tls.crt";

/// The Astarte micro-services and the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AstarteComponent {
    Housekeeping,
    HousekeepingApi,
    RealmManagement,
    RealmManagementApi,
    Pairing,
    PairingApi,
    TriggerEngine,
    DataUpdaterPlant,
    AppEngineApi,
    Dashboard,
}

impl AstarteComponent {
    pub const ALL: [AstarteComponent; 10] = [
        AstarteComponent::Housekeeping,
        AstarteComponent::HousekeepingApi,
        AstarteComponent::RealmManagement,
        AstarteComponent::RealmManagementApi,
        AstarteComponent::Pairing,
        AstarteComponent::PairingApi,
        AstarteComponent::TriggerEngine,
        AstarteComponent::DataUpdaterPlant,
        AstarteComponent::AppEngineApi,
        AstarteComponent::Dashboard,
    ];

    pub fn dashed_str(&self) -> &'static str {
        match self {
            AstarteComponent::Housekeeping => "housekeeping",
            AstarteComponent::HousekeepingApi => "housekeeping-api",
            AstarteComponent::RealmManagement => "realm-management",
            AstarteComponent::RealmManagementApi => "realm-management-api",
            AstarteComponent::Pairing => "pairing",
            AstarteComponent::PairingApi => "pairing-api",
            AstarteComponent::TriggerEngine => "trigger-engine",
            AstarteComponent::DataUpdaterPlant => "data-updater-plant",
            AstarteComponent::AppEngineApi => "appengine-api",
            AstarteComponent::Dashboard => "dashboard",
        }
    }

    pub fn docker_image_name(&self) -> String {
        match self {
            AstarteComponent::Dashboard => "astarte-dashboard".to_string(),
            other => format!("astarte_{}", other.dashed_str().replace('-', "_")),
        }
    }

    pub fn is_api(&self) -> bool {
        matches!(
            self,
            AstarteComponent::HousekeepingApi
                | AstarteComponent::RealmManagementApi
                | AstarteComponent::PairingApi
                | AstarteComponent::AppEngineApi
        )
    }

    /// Public path prefix of the API behind the ingress.
    pub fn service_relative_path(&self) -> &'static str {
        match self {
            AstarteComponent::HousekeepingApi => "housekeeping",
            AstarteComponent::RealmManagementApi => "realmmanagement",
            AstarteComponent::PairingApi => "pairing",
            AstarteComponent::AppEngineApi => "appengine",
            _ => "",
        }
    }

    pub fn generic_spec<'a>(&self, astarte: &'a Astarte) -> &'a AstarteGenericClusteredResource {
        let components = &astarte.spec.components;
        match self {
            AstarteComponent::Housekeeping => &components.housekeeping.backend,
            AstarteComponent::HousekeepingApi => &components.housekeeping.api.generic,
            AstarteComponent::RealmManagement => &components.realm_management.backend,
            AstarteComponent::RealmManagementApi => &components.realm_management.api.generic,
            AstarteComponent::Pairing => &components.pairing.backend,
            AstarteComponent::PairingApi => &components.pairing.api.generic,
            AstarteComponent::TriggerEngine => &components.trigger_engine,
            AstarteComponent::DataUpdaterPlant => &components.data_updater_plant.generic,
            AstarteComponent::AppEngineApi => &components.appengine_api.generic,
            AstarteComponent::Dashboard => &components.dashboard.generic,
        }
    }

    pub fn api_spec<'a>(&self, astarte: &'a Astarte) -> Option<&'a AstarteGenericApiSpec> {
        let components = &astarte.spec.components;
        match self {
            AstarteComponent::HousekeepingApi => Some(&components.housekeeping.api),
            AstarteComponent::RealmManagementApi => Some(&components.realm_management.api),
            AstarteComponent::PairingApi => Some(&components.pairing.api),
            AstarteComponent::AppEngineApi => Some(&components.appengine_api),
            _ => None,
        }
    }
}

impl fmt::Display for AstarteComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dashed_str())
    }
}

pub fn astarte_name(astarte: &Astarte) -> String {
    astarte.metadata.name.clone().unwrap_or_default()
}

pub fn astarte_namespace(astarte: &Astarte) -> String {
    astarte.metadata.namespace.clone().unwrap_or_default()
}

pub fn component_name(astarte: &Astarte, component: AstarteComponent) -> String {
    format!("{}-{}", astarte_name(astarte), component.dashed_str())
}

pub fn housekeeping_private_key_secret_name(astarte: &Astarte) -> String {
    astarte_name(astarte) + "-housekeeping-private-key"
}

pub fn housekeeping_public_key_secret_name(astarte: &Astarte) -> String {
    astarte_name(astarte) + "-housekeeping-public-key"
}

pub fn generic_erlang_configuration_name(astarte: &Astarte) -> String {
    astarte_name(astarte) + "-generic-erlang-configuration"
}

pub fn rabbitmq_name(astarte: &Astarte) -> String {
    astarte_name(astarte) + "-rabbitmq"
}

pub fn rabbitmq_default_credentials_secret_name(astarte: &Astarte) -> String {
    astarte_name(astarte) + "-rabbitmq-user-credentials"
}

pub fn cassandra_name(astarte: &Astarte) -> String {
    astarte_name(astarte) + "-cassandra"
}

pub fn cfssl_name(astarte: &Astarte) -> String {
    astarte_name(astarte) + "-cfssl"
}

pub fn cfssl_ca_secret_name(astarte: &Astarte) -> String {
    astarte_name(astarte) + "-cfssl-ca"
}

pub fn vernemq_name(astarte: &Astarte) -> String {
    astarte_name(astarte) + "-vernemq"
}

pub fn dashboard_config_map_name(astarte: &Astarte) -> String {
    component_name(astarte, AstarteComponent::Dashboard) + "-config"
}

/// Prefixes of the claims created from the dependencies' volume claim templates.
pub fn persistent_volume_claim_prefixes(astarte: &Astarte) -> Vec<String> {
    [vernemq_name(astarte), rabbitmq_name(astarte), cfssl_name(astarte), cassandra_name(astarte)]
        .into_iter()
        .map(|name| name + "-data")
        .collect()
}

/// Where a component finds the RabbitMQ admin credentials: secret name, username key, password key.
pub fn rabbitmq_user_credentials_secret(astarte: &Astarte) -> (String, String, String) {
    match astarte
        .spec
        .rabbitmq
        .connection
        .as_ref()
        .and_then(|connection| connection.secret.as_ref())
    {
        Some(secret) => (secret.name.clone(), secret.username_key.clone(), secret.password_key.clone()),
        None => (
            rabbitmq_default_credentials_secret_name(astarte),
            RABBITMQ_USERNAME_KEY.to_string(),
            RABBITMQ_PASSWORD_KEY.to_string(),
        ),
    }
}

pub fn rabbitmq_host_and_port(astarte: &Astarte) -> (String, i32) {
    let connection = astarte.spec.rabbitmq.connection.as_ref();
    let port = connection.and_then(|c| c.port).unwrap_or(5672);
    match connection.map(|c| c.host.clone()).filter(|host| !host.is_empty()) {
        Some(host) if !is_deployed(&astarte.spec.rabbitmq.generic) => (host, port),
        _ => (format!("{}.{}.svc.cluster.local", rabbitmq_name(astarte), astarte_namespace(astarte)), 5672),
    }
}

pub fn cassandra_nodes(astarte: &Astarte) -> String {
    match &astarte.spec.cassandra.nodes {
        Some(nodes) if !is_deployed(&astarte.spec.cassandra.generic) => nodes.clone(),
        _ => format!("{}.{}.svc.cluster.local:9042", cassandra_name(astarte), astarte_namespace(astarte)),
    }
}

pub fn cfssl_url(astarte: &Astarte) -> String {
    match &astarte.spec.cfssl.url {
        Some(url) if !is_deployed(&astarte.spec.cfssl.generic) => url.clone(),
        _ => format!("http://{}.{}.svc.cluster.local", cfssl_name(astarte), astarte_namespace(astarte)),
    }
}

pub fn base_api_url(astarte: &Astarte) -> String {
    format!("https://{}", astarte.spec.api.host)
}

pub fn broker_url(astarte: &Astarte) -> String {
    format!(
        "mqtts://{}:{}",
        astarte.spec.vernemq.host,
        astarte.spec.vernemq.port.unwrap_or(DEFAULT_BROKER_PORT)
    )
}

pub fn is_deployed(resource: &AstarteGenericClusteredResource) -> bool {
    resource.deploy.unwrap_or(true)
}

pub fn rbac_enabled(astarte: &Astarte) -> bool {
    astarte.spec.rbac.unwrap_or(true)
}

pub fn make_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL_KEY.to_string(), app.to_string())])
}

pub fn make_component_labels(astarte: &Astarte, component: AstarteComponent) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL_KEY.to_string(), component_name(astarte, component)),
        (COMPONENT_LABEL_KEY.to_string(), COMPONENT_LABEL_VALUE.to_string()),
        (ASTARTE_COMPONENT_LABEL_KEY.to_string(), component.dashed_str().to_string()),
    ])
}

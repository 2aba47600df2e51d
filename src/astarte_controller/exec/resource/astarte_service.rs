// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::*;
use crate::astarte_controller::exec::credentials::random_token;
use crate::astarte_controller::exec::resource::{
    common::*, erlang_configuration::VM_ARGS_KEY, Companion, ComponentBuilder, Workload, WorkloadKind,
};
use crate::astarte_controller::trusted::spec_types::*;
use crate::Error;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

pub const ASTARTE_API_PORT: i32 = 4000;
pub const ASTARTE_COOKIE_KEY: &str = "erlang-cookie";

/// Builds one of the Astarte micro-services: a Deployment sharing the generic
/// Erlang configuration, plus a Service for the API components.
pub struct AstarteServiceBuilder(pub AstarteComponent);

pub fn astarte_service_cookie_secret_name(astarte: &Astarte, component: AstarteComponent) -> String {
    component_name(astarte, component) + "-cookie"
}

// HOUSEKEEPING_API, DATA_UPDATER_PLANT...
fn env_prefix(component: AstarteComponent) -> String {
    component.dashed_str().replace('-', "_").to_uppercase()
}

fn uses_cassandra(component: AstarteComponent) -> bool {
    matches!(
        component,
        AstarteComponent::Housekeeping
            | AstarteComponent::RealmManagement
            | AstarteComponent::Pairing
            | AstarteComponent::TriggerEngine
            | AstarteComponent::DataUpdaterPlant
            | AstarteComponent::AppEngineApi
    )
}

// Prefixes of the AMQP connections a component opens.
fn amqp_connections(component: AstarteComponent) -> &'static [&'static str] {
    match component {
        AstarteComponent::DataUpdaterPlant => &["DATA_UPDATER_PLANT_AMQP_CONSUMER", "DATA_UPDATER_PLANT_AMQP_PRODUCER"],
        AstarteComponent::TriggerEngine => &["TRIGGER_ENGINE_AMQP_CONSUMER"],
        AstarteComponent::AppEngineApi => &["APPENGINE_API_ROOMS_AMQP_CLIENT"],
        _ => &[],
    }
}

fn make_astarte_env_vars(astarte: &Astarte, component: AstarteComponent) -> Vec<corev1::EnvVar> {
    let mut env = vec![
        env_var_from_field("MY_POD_IP", "status.podIP"),
        env_var("RELEASE_NAME", component.docker_image_name()),
        env_var("REPLACE_OS_VARS", "true"),
        env_var_from_secret(
            "ERLANG_COOKIE",
            &astarte_service_cookie_secret_name(astarte, component),
            ASTARTE_COOKIE_KEY,
        ),
    ];
    if uses_cassandra(component) {
        env.push(env_var("CASSANDRA_NODES", cassandra_nodes(astarte)));
    }

    let (rabbitmq_host, rabbitmq_port) = rabbitmq_host_and_port(astarte);
    let (secret, username_key, password_key) = rabbitmq_user_credentials_secret(astarte);
    for prefix in amqp_connections(component) {
        env.push(env_var(&format!("{}_HOST", prefix), rabbitmq_host.clone()));
        env.push(env_var(&format!("{}_PORT", prefix), rabbitmq_port.to_string()));
        env.push(env_var_from_secret(&format!("{}_USERNAME", prefix), &secret, &username_key));
        env.push(env_var_from_secret(&format!("{}_PASSWORD", prefix), &secret, &password_key));
    }

    if let Some(api) = component.api_spec(astarte) {
        let prefix = env_prefix(component);
        env.push(env_var(&format!("{}_PORT", prefix), ASTARTE_API_PORT.to_string()));
        if api.disable_authentication.unwrap_or(false) {
            env.push(env_var(&format!("{}_DISABLE_AUTHENTICATION", prefix), "true"));
        }
    }

    match component {
        AstarteComponent::HousekeepingApi => {
            env.push(env_var("HOUSEKEEPING_API_JWT_PUBLIC_KEY_PATH", "/keys/public-key"));
        }
        AstarteComponent::Pairing => {
            env.push(env_var("PAIRING_CFSSL_URL", cfssl_url(astarte)));
            env.push(env_var("PAIRING_BROKER_URL", broker_url(astarte)));
        }
        AstarteComponent::DataUpdaterPlant => {
            if let Some(prefetch_count) = astarte.spec.components.data_updater_plant.prefetch_count {
                env.push(env_var(
                    "DATA_UPDATER_PLANT_AMQP_CONSUMER_PREFETCH_COUNT",
                    prefetch_count.to_string(),
                ));
            }
        }
        _ => {}
    }
    env
}

fn make_astarte_pod_spec(astarte: &Astarte, component: AstarteComponent) -> corev1::PodSpec {
    let generic = component.generic_spec(astarte);
    let labels = make_labels(&component_name(astarte, component));
    let mut volumes = vec![corev1::Volume {
        name: "beam-config".to_string(),
        config_map: Some(corev1::ConfigMapVolumeSource {
            name: generic_erlang_configuration_name(astarte),
            items: Some(vec![corev1::KeyToPath {
                key: VM_ARGS_KEY.to_string(),
                path: VM_ARGS_KEY.to_string(),
                ..corev1::KeyToPath::default()
            }]),
            ..corev1::ConfigMapVolumeSource::default()
        }),
        ..corev1::Volume::default()
    }];
    let mut volume_mounts = vec![volume_mount("beam-config", "/beamconfig")];
    if component == AstarteComponent::HousekeepingApi {
        volumes.push(secret_volume("jwtpubkey", &housekeeping_public_key_secret_name(astarte)));
        volume_mounts.push(volume_mount("jwtpubkey", "/keys"));
    }

    let mut container = corev1::Container {
        name: component.dashed_str().to_string(),
        image: Some(astarte_image(astarte, component)),
        image_pull_policy: image_pull_policy(astarte),
        resources: resources_for(astarte, generic),
        env: Some(make_astarte_env_vars(astarte, component)),
        volume_mounts: Some(volume_mounts),
        ..corev1::Container::default()
    };
    if component.is_api() {
        container.ports = Some(vec![make_container_port("http", ASTARTE_API_PORT)]);
        container.readiness_probe = Some(make_http_probe("/health", "http", 10, 5));
        container.liveness_probe = Some(make_http_probe("/health", "http", 60, 20));
    }

    corev1::PodSpec {
        termination_grace_period_seconds: Some(30),
        image_pull_secrets: image_pull_secrets(astarte),
        affinity: make_anti_affinity(generic, &labels),
        containers: vec![container],
        volumes: Some(volumes),
        ..corev1::PodSpec::default()
    }
}

impl ComponentBuilder for AstarteServiceBuilder {
    fn name(&self) -> String {
        self.0.dashed_str().to_string()
    }

    fn workload_name(&self, astarte: &Astarte) -> String {
        component_name(astarte, self.0)
    }

    fn workload_kind(&self) -> WorkloadKind {
        WorkloadKind::Deployment
    }

    fn deploy(&self, astarte: &Astarte) -> bool {
        is_deployed(self.0.generic_spec(astarte))
    }

    fn companions(&self, astarte: &Astarte) -> Result<Vec<Companion>, Error> {
        let component = self.0;
        let name = component_name(astarte, component);
        if !self.deploy(astarte) {
            return Ok(Vec::new());
        }
        let labels = make_component_labels(astarte, component);
        let mut companions = vec![Companion::GeneratedSecret(make_secret(
            astarte,
            astarte_service_cookie_secret_name(astarte, component),
            labels.clone(),
            BTreeMap::from([(ASTARTE_COOKIE_KEY.to_string(), random_token(32))]),
        )?)];
        if component.is_api() {
            companions.push(Companion::Service(make_service(
                astarte,
                name.clone(),
                labels,
                make_labels(&name),
                vec![make_service_port("http", ASTARTE_API_PORT)],
                false,
            )?));
        }
        Ok(companions)
    }

    fn make_workload(&self, astarte: &Astarte) -> Result<Workload, Error> {
        let component = self.0;
        let name = component_name(astarte, component);
        let labels = make_component_labels(astarte, component);
        Ok(Workload::Deployment(appsv1::Deployment {
            metadata: make_object_meta(astarte, name.clone(), labels.clone())?,
            spec: Some(appsv1::DeploymentSpec {
                replicas: component.generic_spec(astarte).replicas,
                selector: label_selector(&make_labels(&name)),
                strategy: astarte.spec.deployment_strategy.clone(),
                template: corev1::PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(make_astarte_pod_spec(astarte, component)),
                },
                ..appsv1::DeploymentSpec::default()
            }),
            ..appsv1::Deployment::default()
        }))
    }
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::*;
use crate::astarte_controller::exec::resource::Companion;
use crate::astarte_controller::trusted::spec_types::*;
use crate::Error;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::api::rbac::v1 as rbacv1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::Resource;
use std::collections::BTreeMap;

pub fn make_owner_references(astarte: &Astarte) -> Result<Vec<metav1::OwnerReference>, Error> {
    let owner_ref = astarte
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey(".metadata.uid"))?;
    Ok(vec![owner_ref])
}

pub fn make_object_meta(astarte: &Astarte, name: String, labels: BTreeMap<String, String>) -> Result<ObjectMeta, Error> {
    Ok(ObjectMeta {
        name: Some(name),
        namespace: astarte.metadata.namespace.clone(),
        labels: Some(labels),
        owner_references: Some(make_owner_references(astarte)?),
        ..ObjectMeta::default()
    })
}

pub fn make_config_map(
    astarte: &Astarte,
    name: String,
    labels: BTreeMap<String, String>,
    data: BTreeMap<String, String>,
) -> Result<corev1::ConfigMap, Error> {
    Ok(corev1::ConfigMap {
        metadata: make_object_meta(astarte, name, labels)?,
        data: Some(data),
        ..corev1::ConfigMap::default()
    })
}

pub fn make_secret(
    astarte: &Astarte,
    name: String,
    labels: BTreeMap<String, String>,
    data: BTreeMap<String, String>,
) -> Result<corev1::Secret, Error> {
    Ok(corev1::Secret {
        metadata: make_object_meta(astarte, name, labels)?,
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k, ByteString(v.into_bytes())))
                .collect(),
        ),
        type_: Some("Opaque".to_string()),
        ..corev1::Secret::default()
    })
}

pub fn make_service(
    astarte: &Astarte,
    name: String,
    labels: BTreeMap<String, String>,
    selector: BTreeMap<String, String>,
    ports: Vec<corev1::ServicePort>,
    headless: bool,
) -> Result<corev1::Service, Error> {
    Ok(corev1::Service {
        metadata: make_object_meta(astarte, name, labels)?,
        spec: Some(corev1::ServiceSpec {
            cluster_ip: if headless { Some("None".to_string()) } else { None },
            selector: Some(selector),
            ports: Some(ports),
            type_: Some("ClusterIP".to_string()),
            ..corev1::ServiceSpec::default()
        }),
        ..corev1::Service::default()
    })
}

pub fn make_service_port(name: &str, port: i32) -> corev1::ServicePort {
    corev1::ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::String(name.to_string())),
        protocol: Some("TCP".to_string()),
        ..corev1::ServicePort::default()
    }
}

pub fn make_container_port(name: &str, port: i32) -> corev1::ContainerPort {
    corev1::ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..corev1::ContainerPort::default()
    }
}

/// ServiceAccount, Role and RoleBinding named name, granting rules; none when
/// RBAC is disabled.
pub fn make_rbac_companions(
    astarte: &Astarte,
    name: String,
    labels: BTreeMap<String, String>,
    rules: Vec<rbacv1::PolicyRule>,
) -> Result<Vec<Companion>, Error> {
    if !rbac_enabled(astarte) {
        return Ok(Vec::new());
    }
    let service_account = corev1::ServiceAccount {
        metadata: make_object_meta(astarte, name.clone(), labels.clone())?,
        ..corev1::ServiceAccount::default()
    };
    let role = rbacv1::Role {
        metadata: make_object_meta(astarte, name.clone(), labels.clone())?,
        rules: Some(rules),
    };
    let role_binding = rbacv1::RoleBinding {
        metadata: make_object_meta(astarte, name.clone(), labels)?,
        role_ref: rbacv1::RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: name.clone(),
        },
        subjects: Some(vec![rbacv1::Subject {
            kind: "ServiceAccount".to_string(),
            name,
            namespace: astarte.metadata.namespace.clone(),
            ..rbacv1::Subject::default()
        }]),
    };
    Ok(vec![
        Companion::ServiceAccount(service_account),
        Companion::Role(role),
        Companion::RoleBinding(role_binding),
    ])
}

pub fn make_policy_rule(resources: &[&str], verbs: &[&str]) -> rbacv1::PolicyRule {
    rbacv1::PolicyRule {
        api_groups: Some(vec!["".to_string()]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..rbacv1::PolicyRule::default()
    }
}

pub fn service_account_name(astarte: &Astarte, name: &str) -> Option<String> {
    if rbac_enabled(astarte) {
        Some(name.to_string())
    } else {
        None
    }
}

pub fn distribution_channel(astarte: &Astarte) -> &str {
    astarte
        .spec
        .distribution_channel
        .as_deref()
        .unwrap_or(DEFAULT_DISTRIBUTION_CHANNEL)
}

/// The image of an Astarte service: the override if any, else the distribution
/// channel's image tagged with the component or instance version.
pub fn astarte_image(astarte: &Astarte, component: AstarteComponent) -> String {
    let generic = component.generic_spec(astarte);
    match &generic.image {
        Some(image) if !image.is_empty() => image.clone(),
        _ => format!(
            "{}/{}:{}",
            distribution_channel(astarte),
            component.docker_image_name(),
            generic.version.as_deref().unwrap_or(&astarte.spec.version)
        ),
    }
}

pub fn dependency_image(generic: &AstarteGenericClusteredResource, default_image: &str, default_tag: &str) -> String {
    match &generic.image {
        Some(image) if !image.is_empty() => image.clone(),
        _ => format!("{}:{}", default_image, generic.version.as_deref().unwrap_or(default_tag)),
    }
}

pub fn image_pull_policy(astarte: &Astarte) -> Option<String> {
    astarte.spec.image_pull_policy.clone()
}

pub fn image_pull_secrets(astarte: &Astarte) -> Option<Vec<corev1::LocalObjectReference>> {
    astarte.spec.image_pull_secrets.clone()
}

pub fn resources_for(astarte: &Astarte, generic: &AstarteGenericClusteredResource) -> Option<corev1::ResourceRequirements> {
    generic
        .resources
        .clone()
        .or_else(|| astarte.spec.components.resources.clone())
}

/// Spreads replicas across nodes unless anti affinity is turned off.
pub fn make_anti_affinity(
    generic: &AstarteGenericClusteredResource,
    labels: &BTreeMap<String, String>,
) -> Option<corev1::Affinity> {
    if !generic.anti_affinity.unwrap_or(true) {
        return None;
    }
    Some(corev1::Affinity {
        pod_anti_affinity: Some(corev1::PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![corev1::WeightedPodAffinityTerm {
                weight: 100,
                pod_affinity_term: corev1::PodAffinityTerm {
                    label_selector: Some(metav1::LabelSelector {
                        match_labels: Some(labels.clone()),
                        ..metav1::LabelSelector::default()
                    }),
                    topology_key: "kubernetes.io/hostname".to_string(),
                    ..corev1::PodAffinityTerm::default()
                },
            }]),
            ..corev1::PodAntiAffinity::default()
        }),
        ..corev1::Affinity::default()
    })
}

pub fn make_data_volume_claim_template(
    astarte: &Astarte,
    name: String,
    labels: BTreeMap<String, String>,
    storage: Option<&AstartePersistentStorageSpec>,
    default_size: &str,
) -> corev1::PersistentVolumeClaim {
    let size = storage
        .and_then(|s| s.size.clone())
        .unwrap_or_else(|| Quantity(default_size.to_string()));
    let class_name = storage
        .and_then(|s| s.class_name.clone())
        .or_else(|| astarte.spec.storage_class_name.clone());
    corev1::PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        spec: Some(corev1::PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: class_name,
            resources: Some(corev1::VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), size)])),
                ..corev1::VolumeResourceRequirements::default()
            }),
            ..corev1::PersistentVolumeClaimSpec::default()
        }),
        ..corev1::PersistentVolumeClaim::default()
    }
}

pub fn env_var(name: &str, value: impl Into<String>) -> corev1::EnvVar {
    corev1::EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..corev1::EnvVar::default()
    }
}

pub fn env_var_from_secret(name: &str, secret: &str, key: &str) -> corev1::EnvVar {
    corev1::EnvVar {
        name: name.to_string(),
        value_from: Some(corev1::EnvVarSource {
            secret_key_ref: Some(corev1::SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                ..corev1::SecretKeySelector::default()
            }),
            ..corev1::EnvVarSource::default()
        }),
        ..corev1::EnvVar::default()
    }
}

pub fn env_var_from_field(name: &str, field_path: &str) -> corev1::EnvVar {
    corev1::EnvVar {
        name: name.to_string(),
        value_from: Some(corev1::EnvVarSource {
            field_ref: Some(corev1::ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..corev1::ObjectFieldSelector::default()
            }),
            ..corev1::EnvVarSource::default()
        }),
        ..corev1::EnvVar::default()
    }
}

pub fn make_exec_probe(command: &[&str], initial_delay_seconds: i32, period_seconds: i32) -> corev1::Probe {
    corev1::Probe {
        exec: Some(corev1::ExecAction {
            command: Some(command.iter().map(|c| c.to_string()).collect()),
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(period_seconds),
        timeout_seconds: Some(10),
        ..corev1::Probe::default()
    }
}

pub fn make_http_probe(path: &str, port: &str, initial_delay_seconds: i32, period_seconds: i32) -> corev1::Probe {
    corev1::Probe {
        http_get: Some(corev1::HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::String(port.to_string()),
            ..corev1::HTTPGetAction::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(period_seconds),
        ..corev1::Probe::default()
    }
}

pub fn make_tcp_probe(port: &str, initial_delay_seconds: i32, period_seconds: i32) -> corev1::Probe {
    corev1::Probe {
        tcp_socket: Some(corev1::TCPSocketAction {
            port: IntOrString::String(port.to_string()),
            ..corev1::TCPSocketAction::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(period_seconds),
        ..corev1::Probe::default()
    }
}

pub fn config_map_volume(name: &str, config_map: &str) -> corev1::Volume {
    corev1::Volume {
        name: name.to_string(),
        config_map: Some(corev1::ConfigMapVolumeSource {
            name: config_map.to_string(),
            ..corev1::ConfigMapVolumeSource::default()
        }),
        ..corev1::Volume::default()
    }
}

pub fn secret_volume(name: &str, secret: &str) -> corev1::Volume {
    corev1::Volume {
        name: name.to_string(),
        secret: Some(corev1::SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..corev1::SecretVolumeSource::default()
        }),
        ..corev1::Volume::default()
    }
}

pub fn volume_mount(name: &str, mount_path: &str) -> corev1::VolumeMount {
    corev1::VolumeMount {
        name: name.to_string(),
        mount_path: mount_path.to_string(),
        ..corev1::VolumeMount::default()
    }
}

pub fn label_selector(labels: &BTreeMap<String, String>) -> metav1::LabelSelector {
    metav1::LabelSelector {
        match_labels: Some(labels.clone()),
        ..metav1::LabelSelector::default()
    }
}

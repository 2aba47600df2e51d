// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::*;
use crate::astarte_controller::exec::credentials::random_token;
use crate::astarte_controller::exec::resource::{common::*, Companion, ComponentBuilder, Workload, WorkloadKind};
use crate::astarte_controller::exec::version::version_dependent;
use crate::astarte_controller::trusted::spec_types::*;
use crate::Error;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use semver::Version;
use std::collections::BTreeMap;

pub struct RabbitMqBuilder;

pub fn rabbitmq_cookie_secret_name(astarte: &Astarte) -> String {
    rabbitmq_name(astarte) + "-cookie"
}

pub fn rabbitmq_config_map_name(astarte: &Astarte) -> String {
    rabbitmq_name(astarte) + "-config"
}

pub fn default_rabbitmq_version(astarte_version: &str) -> &'static str {
    version_dependent(astarte_version, &Version::new(0, 11, 0), "3.7.15", "3.7.21")
}

/// Companion holding the credentials Astarte uses to talk to RabbitMQ: the given
/// credentials, generated ones, or nothing when they live in a user secret.
pub fn make_user_credentials_secret(astarte: &Astarte) -> Result<Companion, Error> {
    let name = rabbitmq_default_credentials_secret_name(astarte);
    let connection = astarte.spec.rabbitmq.connection.as_ref();
    if connection.map_or(false, |c| c.secret.is_some()) {
        return Ok(Companion::AbsentSecret(name));
    }
    let labels = make_labels(&rabbitmq_name(astarte));
    match connection.and_then(|c| c.username.clone()).filter(|u| !u.is_empty()) {
        Some(username) => {
            let password = connection.and_then(|c| c.password.clone()).unwrap_or_default();
            Ok(Companion::Secret(make_secret(
                astarte,
                name,
                labels,
                BTreeMap::from([
                    (RABBITMQ_USERNAME_KEY.to_string(), username),
                    (RABBITMQ_PASSWORD_KEY.to_string(), password),
                ]),
            )?))
        }
        None => Ok(Companion::GeneratedSecret(make_secret(
            astarte,
            name,
            labels,
            BTreeMap::from([
                (RABBITMQ_USERNAME_KEY.to_string(), RABBITMQ_DEFAULT_USERNAME.to_string()),
                (RABBITMQ_PASSWORD_KEY.to_string(), random_token(16)),
            ]),
        )?)),
    }
}

fn make_rabbitmq_config_map_data(astarte: &Astarte) -> BTreeMap<String, String> {
    let mut plugins = vec!["rabbitmq_management".to_string(), "rabbitmq_peer_discovery_k8s".to_string()];
    plugins.extend(astarte.spec.rabbitmq.additional_plugins.clone().unwrap_or_default());
    let rabbitmq_conf = format!(
        "## Clustering
cluster_formation.peer_discovery_backend  = rabbit_peer_discovery_k8s
cluster_formation.k8s.host = kubernetes.default.svc.cluster.local
cluster_formation.k8s.hostname_suffix = .{}.{}.svc.cluster.local
cluster_formation.k8s.address_type = hostname
cluster_formation.node_cleanup.interval = 10
cluster_formation.node_cleanup.only_log_warning = true
cluster_partition_handling = autoheal
queue_master_locator=min-masters
loopback_users.guest = false
",
        rabbitmq_name(astarte),
        astarte_namespace(astarte)
    );
    BTreeMap::from([
        ("enabled_plugins".to_string(), format!("[{}].\n", plugins.join(","))),
        ("rabbitmq.conf".to_string(), rabbitmq_conf),
    ])
}

fn make_rabbitmq_env_vars(astarte: &Astarte) -> Vec<corev1::EnvVar> {
    let name = rabbitmq_name(astarte);
    let (secret, username_key, password_key) = rabbitmq_user_credentials_secret(astarte);
    vec![
        env_var("RABBITMQ_USE_LONGNAME", "true"),
        env_var_from_field("MY_POD_NAME", "metadata.name"),
        env_var(
            "RABBITMQ_NODENAME",
            format!("rabbit@$(MY_POD_NAME).{}.{}.svc.cluster.local", name, astarte_namespace(astarte)),
        ),
        env_var("K8S_SERVICE_NAME", name),
        env_var_from_secret("RABBITMQ_DEFAULT_USER", &secret, &username_key),
        env_var_from_secret("RABBITMQ_DEFAULT_PASS", &secret, &password_key),
        env_var_from_secret("RABBITMQ_ERLANG_COOKIE", &rabbitmq_cookie_secret_name(astarte), RABBITMQ_COOKIE_KEY),
    ]
}

fn make_rabbitmq_pod_spec(astarte: &Astarte) -> corev1::PodSpec {
    let name = rabbitmq_name(astarte);
    let generic = &astarte.spec.rabbitmq.generic;
    corev1::PodSpec {
        termination_grace_period_seconds: Some(30),
        service_account_name: service_account_name(astarte, &name),
        init_containers: Some(vec![corev1::Container {
            name: "copy-rabbitmq-config".to_string(),
            image: Some("busybox".to_string()),
            command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "cp /configmap/* /etc/rabbitmq".to_string(),
            ]),
            volume_mounts: Some(vec![
                volume_mount("config-volume", "/configmap"),
                volume_mount("config", "/etc/rabbitmq"),
            ]),
            ..corev1::Container::default()
        }]),
        image_pull_secrets: image_pull_secrets(astarte),
        affinity: make_anti_affinity(generic, &make_labels(&name)),
        containers: vec![corev1::Container {
            name: "rabbitmq".to_string(),
            image: Some(dependency_image(
                generic,
                "rabbitmq",
                default_rabbitmq_version(&astarte.spec.version),
            )),
            image_pull_policy: image_pull_policy(astarte),
            volume_mounts: Some(vec![
                volume_mount("config", "/etc/rabbitmq"),
                volume_mount(&(name.clone() + "-data"), "/var/lib/rabbitmq"),
            ]),
            ports: Some(vec![
                make_container_port("amqp", 5672),
                make_container_port("management", 15672),
            ]),
            // rabbitmqctl status is expensive and slow to succeed on boot.
            liveness_probe: Some(corev1::Probe {
                failure_threshold: Some(3),
                ..make_exec_probe(&["rabbitmqctl", "status"], 300, 60)
            }),
            readiness_probe: Some(corev1::Probe {
                failure_threshold: Some(15),
                ..make_exec_probe(&["rabbitmqctl", "status"], 30, 30)
            }),
            resources: generic.resources.clone(),
            env: Some(make_rabbitmq_env_vars(astarte)),
            ..corev1::Container::default()
        }],
        volumes: Some(vec![
            corev1::Volume {
                name: "config".to_string(),
                empty_dir: Some(corev1::EmptyDirVolumeSource::default()),
                ..corev1::Volume::default()
            },
            config_map_volume("config-volume", &rabbitmq_config_map_name(astarte)),
        ]),
        ..corev1::PodSpec::default()
    }
}

impl ComponentBuilder for RabbitMqBuilder {
    fn name(&self) -> String {
        "rabbitmq".to_string()
    }

    fn workload_name(&self, astarte: &Astarte) -> String {
        rabbitmq_name(astarte)
    }

    fn workload_kind(&self) -> WorkloadKind {
        WorkloadKind::StatefulSet
    }

    fn deploy(&self, astarte: &Astarte) -> bool {
        is_deployed(&astarte.spec.rabbitmq.generic)
    }

    fn validate(&self, astarte: &Astarte) -> Result<(), Error> {
        let rabbitmq = &astarte.spec.rabbitmq;
        if is_deployed(&rabbitmq.generic) {
            return Ok(());
        }
        let invalid = |reason: &str| Error::InvalidDefinition {
            component: "RabbitMQ",
            reason: reason.to_string(),
        };
        let connection = rabbitmq
            .connection
            .as_ref()
            .ok_or_else(|| invalid("when not deploying RabbitMQ, the 'connection' section is compulsory"))?;
        if connection.host.is_empty() {
            return Err(invalid("when not deploying RabbitMQ, it is compulsory to specify at least a host"));
        }
        let has_credentials = connection.username.as_deref().map_or(false, |u| !u.is_empty())
            && connection.password.as_deref().map_or(false, |p| !p.is_empty());
        if !has_credentials && connection.secret.is_none() {
            return Err(invalid(
                "when not deploying RabbitMQ, either a username/password combination or a secret must be provided",
            ));
        }
        Ok(())
    }

    fn companions(&self, astarte: &Astarte) -> Result<Vec<Companion>, Error> {
        let mut companions = vec![make_user_credentials_secret(astarte)?];
        // The rest only serves a deployed RabbitMQ.
        let name = rabbitmq_name(astarte);
        if !self.deploy(astarte) {
            return Ok(companions);
        }
        let labels = make_labels(&name);
        companions.push(Companion::GeneratedSecret(make_secret(
            astarte,
            rabbitmq_cookie_secret_name(astarte),
            labels.clone(),
            BTreeMap::from([(RABBITMQ_COOKIE_KEY.to_string(), random_token(32))]),
        )?));
        companions.extend(make_rbac_companions(
            astarte,
            name.clone(),
            labels.clone(),
            vec![make_policy_rule(&["endpoints"], &["get"])],
        )?);
        companions.push(Companion::Service(make_service(
            astarte,
            name,
            labels.clone(),
            labels.clone(),
            vec![make_service_port("amqp", 5672), make_service_port("management", 15672)],
            true,
        )?));
        companions.push(Companion::ConfigMap(make_config_map(
            astarte,
            rabbitmq_config_map_name(astarte),
            labels,
            make_rabbitmq_config_map_data(astarte),
        )?));
        Ok(companions)
    }

    fn make_workload(&self, astarte: &Astarte) -> Result<Workload, Error> {
        let name = rabbitmq_name(astarte);
        let labels = make_labels(&name);
        Ok(Workload::StatefulSet(appsv1::StatefulSet {
            metadata: make_object_meta(astarte, name.clone(), labels.clone())?,
            spec: Some(appsv1::StatefulSetSpec {
                service_name: name.clone(),
                replicas: astarte.spec.rabbitmq.generic.replicas,
                selector: label_selector(&labels),
                template: corev1::PodTemplateSpec {
                    metadata: Some(kube::api::ObjectMeta {
                        labels: Some(labels.clone()),
                        ..kube::api::ObjectMeta::default()
                    }),
                    spec: Some(make_rabbitmq_pod_spec(astarte)),
                },
                volume_claim_templates: Some(vec![make_data_volume_claim_template(
                    astarte,
                    name + "-data",
                    labels,
                    astarte.spec.rabbitmq.storage.as_ref(),
                    "4G",
                )]),
                ..appsv1::StatefulSetSpec::default()
            }),
            ..appsv1::StatefulSet::default()
        }))
    }
}

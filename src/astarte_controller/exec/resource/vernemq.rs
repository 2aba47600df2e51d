// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::*;
use crate::astarte_controller::exec::resource::{common::*, Companion, ComponentBuilder, Workload, WorkloadKind};
use crate::astarte_controller::trusted::spec_types::*;
use crate::Error;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::api::ObjectMeta;

pub struct VerneMqBuilder;

/// The secret holding the CA device certificates are verified against, if any.
fn vernemq_ca_secret(astarte: &Astarte) -> Option<String> {
    let cfssl = &astarte.spec.cfssl;
    match &cfssl.ca_secret {
        Some(secret) => Some(secret.name.clone()),
        None if is_deployed(&cfssl.generic) => Some(cfssl_ca_secret_name(astarte)),
        None => None,
    }
}

fn make_vernemq_env_vars(astarte: &Astarte) -> Vec<corev1::EnvVar> {
    let name = vernemq_name(astarte);
    let (rabbitmq_host, rabbitmq_port) = rabbitmq_host_and_port(astarte);
    let (secret, username_key, password_key) = rabbitmq_user_credentials_secret(astarte);
    let mut env = vec![
        env_var_from_field("MY_POD_NAME", "metadata.name"),
        env_var_from_field("MY_POD_IP", "status.podIP"),
        env_var("DOCKER_VERNEMQ_DISCOVERY_KUBERNETES", "1"),
        env_var("DOCKER_VERNEMQ_KUBERNETES_LABEL_SELECTOR", format!("{}={}", APP_LABEL_KEY, name)),
        env_var_from_field("DOCKER_VERNEMQ_KUBERNETES_NAMESPACE", "metadata.namespace"),
        env_var("CFSSL_URL", cfssl_url(astarte)),
        env_var("RABBITMQ_HOST", rabbitmq_host),
        env_var("RABBITMQ_PORT", rabbitmq_port.to_string()),
        env_var_from_secret("RABBITMQ_USERNAME", &secret, &username_key),
        env_var_from_secret("RABBITMQ_PASSWORD", &secret, &password_key),
    ];
    if vernemq_ca_secret(astarte).is_some() {
        env.push(env_var("USE_CA_CERT", "true"));
    }
    env
}

fn make_vernemq_pod_spec(astarte: &Astarte) -> corev1::PodSpec {
    let name = vernemq_name(astarte);
    let generic = &astarte.spec.vernemq.generic;
    let mut volumes = Vec::new();
    let mut volume_mounts = vec![volume_mount(&(name.clone() + "-data"), "/opt/vernemq/data")];
    if let Some(ca_secret) = vernemq_ca_secret(astarte) {
        volumes.push(secret_volume("cfssl-ca", &ca_secret));
        volume_mounts.push(volume_mount("cfssl-ca", "/opt/vernemq/etc/ca"));
    }
    corev1::PodSpec {
        termination_grace_period_seconds: Some(30),
        service_account_name: service_account_name(astarte, &name),
        image_pull_secrets: image_pull_secrets(astarte),
        affinity: make_anti_affinity(generic, &make_labels(&name)),
        containers: vec![corev1::Container {
            name: "vernemq".to_string(),
            image: Some(dependency_image(
                generic,
                &format!("{}/vernemq", distribution_channel(astarte)),
                &astarte.spec.version,
            )),
            image_pull_policy: image_pull_policy(astarte),
            ports: Some(vec![
                make_container_port("mqtt-reverse", 1885),
                make_container_port("mqtts", 8883),
                make_container_port("vmq-cluster", 44053),
                make_container_port("epmd", 4369),
            ]),
            readiness_probe: Some(make_tcp_probe("mqtt-reverse", 60, 20)),
            liveness_probe: Some(make_tcp_probe("mqtt-reverse", 60, 20)),
            resources: resources_for(astarte, generic),
            env: Some(make_vernemq_env_vars(astarte)),
            volume_mounts: Some(volume_mounts),
            ..corev1::Container::default()
        }],
        volumes: if volumes.is_empty() { None } else { Some(volumes) },
        ..corev1::PodSpec::default()
    }
}

impl ComponentBuilder for VerneMqBuilder {
    fn name(&self) -> String {
        "vernemq".to_string()
    }

    fn workload_name(&self, astarte: &Astarte) -> String {
        vernemq_name(astarte)
    }

    fn workload_kind(&self) -> WorkloadKind {
        WorkloadKind::StatefulSet
    }

    fn deploy(&self, astarte: &Astarte) -> bool {
        is_deployed(&astarte.spec.vernemq.generic)
    }

    fn validate(&self, astarte: &Astarte) -> Result<(), Error> {
        if astarte.spec.vernemq.host.is_empty() {
            return Err(Error::InvalidDefinition {
                component: "VerneMQ",
                reason: "the broker host must be specified".to_string(),
            });
        }
        Ok(())
    }

    fn companions(&self, astarte: &Astarte) -> Result<Vec<Companion>, Error> {
        let name = vernemq_name(astarte);
        if !self.deploy(astarte) {
            return Ok(Vec::new());
        }
        let labels = make_labels(&name);
        let mut companions = make_rbac_companions(
            astarte,
            name.clone(),
            labels.clone(),
            vec![make_policy_rule(&["pods"], &["get", "list"])],
        )?;
        companions.push(Companion::Service(make_service(
            astarte,
            name,
            labels.clone(),
            labels,
            vec![
                make_service_port("mqtt-reverse", 1885),
                make_service_port("mqtts", 8883),
                make_service_port("vmq-cluster", 44053),
                make_service_port("epmd", 4369),
            ],
            true,
        )?));
        Ok(companions)
    }

    fn make_workload(&self, astarte: &Astarte) -> Result<Workload, Error> {
        let name = vernemq_name(astarte);
        let labels = make_labels(&name);
        Ok(Workload::StatefulSet(appsv1::StatefulSet {
            metadata: make_object_meta(astarte, name.clone(), labels.clone())?,
            spec: Some(appsv1::StatefulSetSpec {
                service_name: name.clone(),
                replicas: astarte.spec.vernemq.generic.replicas,
                selector: label_selector(&labels),
                template: corev1::PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels.clone()),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(make_vernemq_pod_spec(astarte)),
                },
                volume_claim_templates: Some(vec![make_data_volume_claim_template(
                    astarte,
                    name + "-data",
                    labels,
                    astarte.spec.vernemq.storage.as_ref(),
                    "4G",
                )]),
                ..appsv1::StatefulSetSpec::default()
            }),
            ..appsv1::StatefulSet::default()
        }))
    }
}

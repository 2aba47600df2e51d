// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::*;
use crate::astarte_controller::exec::plan::ConvergenceStep;
use crate::astarte_controller::exec::resource::{common::*, Companion, ComponentBuilder, Workload, WorkloadKind};
use crate::astarte_controller::exec::version::version_dependent;
use crate::astarte_controller::trusted::spec_types::*;
use crate::kubernetes_api_objects::typed_api::TypedApi;
use crate::shim_layer::controller_runtime::Data;
use crate::Error;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use semver::Version;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

pub const CFSSL_DEFAULT_IMAGE: &str = "astarte/cfssl";

pub struct CfsslBuilder;

pub fn cfssl_config_map_name(astarte: &Astarte) -> String {
    cfssl_name(astarte) + "-config"
}

pub fn default_cfssl_version(astarte_version: &str) -> &'static str {
    version_dependent(astarte_version, &Version::new(0, 11, 0), "1.0.0-astarte.0", "1.4.1-astarte.0")
}

fn make_cfssl_config_map_data(astarte: &Astarte) -> BTreeMap<String, String> {
    let cfssl = &astarte.spec.cfssl;
    let ca_expiry = cfssl.ca_expiry.clone().unwrap_or_else(|| "262800h".to_string());
    let certificate_expiry = cfssl.certificate_expiry.clone().unwrap_or_else(|| "8760h".to_string());
    let csr_root_ca = json!({
        "CN": "Astarte Root CA",
        "key": {"algo": "rsa", "size": 2048},
        "names": [{"C": "IT", "L": "Milan", "O": "Astarte User", "OU": "IoT Division", "ST": "Lombardy"}],
        "ca": {"expiry": ca_expiry},
    });
    let config = json!({
        "signing": {
            "default": {
                "usages": ["signing", "key encipherment", "client auth"],
                "expiry": certificate_expiry,
                "ca_constraint": {"is_ca": false},
            }
        }
    });
    BTreeMap::from([
        ("csr_root_ca.json".to_string(), csr_root_ca.to_string()),
        ("config.json".to_string(), config.to_string()),
    ])
}

fn make_cfssl_pod_spec(astarte: &Astarte) -> corev1::PodSpec {
    let name = cfssl_name(astarte);
    let cfssl = &astarte.spec.cfssl;
    let mut volumes = vec![config_map_volume("config", &cfssl_config_map_name(astarte))];
    let mut volume_mounts = vec![
        volume_mount("config", "/config"),
        volume_mount(&(name.clone() + "-data"), "/data"),
    ];
    if let Some(ca_secret) = &cfssl.ca_secret {
        volumes.push(secret_volume("ca", &ca_secret.name));
        volume_mounts.push(volume_mount("ca", "/ca"));
    }
    corev1::PodSpec {
        termination_grace_period_seconds: Some(30),
        image_pull_secrets: image_pull_secrets(astarte),
        affinity: make_anti_affinity(&cfssl.generic, &make_labels(&name)),
        containers: vec![corev1::Container {
            name: "cfssl".to_string(),
            image: Some(dependency_image(
                &cfssl.generic,
                CFSSL_DEFAULT_IMAGE,
                default_cfssl_version(&astarte.spec.version),
            )),
            image_pull_policy: image_pull_policy(astarte),
            ports: Some(vec![make_container_port("http", 8080)]),
            liveness_probe: Some(make_http_probe("/api/v1/cfssl/health", "http", 10, 20)),
            readiness_probe: Some(make_http_probe("/api/v1/cfssl/health", "http", 10, 20)),
            resources: cfssl.generic.resources.clone(),
            volume_mounts: Some(volume_mounts),
            ..corev1::Container::default()
        }],
        volumes: Some(volumes),
        ..corev1::PodSpec::default()
    }
}

impl ComponentBuilder for CfsslBuilder {
    fn name(&self) -> String {
        "cfssl".to_string()
    }

    fn workload_name(&self, astarte: &Astarte) -> String {
        cfssl_name(astarte)
    }

    fn workload_kind(&self) -> WorkloadKind {
        WorkloadKind::StatefulSet
    }

    fn deploy(&self, astarte: &Astarte) -> bool {
        is_deployed(&astarte.spec.cfssl.generic)
    }

    fn validate(&self, astarte: &Astarte) -> Result<(), Error> {
        let cfssl = &astarte.spec.cfssl;
        if !is_deployed(&cfssl.generic) && cfssl.url.as_deref().map_or(true, str::is_empty) {
            return Err(Error::InvalidDefinition {
                component: "CFSSL",
                reason: "when not deploying CFSSL, the url must be specified".to_string(),
            });
        }
        Ok(())
    }

    fn companions(&self, astarte: &Astarte) -> Result<Vec<Companion>, Error> {
        let name = cfssl_name(astarte);
        if !self.deploy(astarte) {
            return Ok(Vec::new());
        }
        let labels = make_labels(&name);
        Ok(vec![
            Companion::ConfigMap(make_config_map(
                astarte,
                cfssl_config_map_name(astarte),
                labels.clone(),
                make_cfssl_config_map_data(astarte),
            )?),
            Companion::Service(make_service(
                astarte,
                name,
                labels.clone(),
                labels,
                vec![corev1::ServicePort {
                    port: 80,
                    ..make_service_port("http", 8080)
                }],
                false,
            )?),
        ])
    }

    fn make_workload(&self, astarte: &Astarte) -> Result<Workload, Error> {
        let name = cfssl_name(astarte);
        let labels = make_labels(&name);
        Ok(Workload::StatefulSet(appsv1::StatefulSet {
            metadata: make_object_meta(astarte, name.clone(), labels.clone())?,
            spec: Some(appsv1::StatefulSetSpec {
                service_name: name.clone(),
                replicas: Some(1),
                selector: label_selector(&labels),
                template: corev1::PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels.clone()),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(make_cfssl_pod_spec(astarte)),
                },
                volume_claim_templates: Some(vec![make_data_volume_claim_template(
                    astarte,
                    name + "-data",
                    labels,
                    astarte.spec.cfssl.storage.as_ref(),
                    "2G",
                )]),
                ..appsv1::StatefulSetSpec::default()
            }),
            ..appsv1::StatefulSet::default()
        }))
    }
}

/// Publishes the certificate of the CA generated by the deployed CFSSL into
/// `<name>-cfssl-ca`, for VerneMQ to verify device certificates against.
///
/// The secret is not owned by the instance: it outlives garbage collection and
/// is removed by finalization.
pub struct CfsslCaSecretStep;

#[async_trait]
impl ConvergenceStep for CfsslCaSecretStep {
    fn name(&self) -> String {
        "cfssl-ca-secret".to_string()
    }

    async fn ensure(&self, astarte: &Astarte, ctx: &Data) -> Result<(), Error> {
        let cfssl = &astarte.spec.cfssl;
        if !is_deployed(&cfssl.generic) || cfssl.ca_secret.is_some() {
            return Ok(());
        }
        let namespace = astarte_namespace(astarte);
        let secret_api = TypedApi::<corev1::Secret>::namespaced(ctx.api.as_ref(), &namespace);
        let secret_name = cfssl_ca_secret_name(astarte);
        if secret_api.get_opt(&secret_name).await?.is_some() {
            return Ok(());
        }

        let stateful_set = TypedApi::<appsv1::StatefulSet>::namespaced(ctx.api.as_ref(), &namespace)
            .get_opt(&cfssl_name(astarte))
            .await?;
        let ready = stateful_set
            .and_then(|sts| sts.status)
            .and_then(|status| status.ready_replicas)
            .unwrap_or(0);
        if ready < 1 {
            return Err(Error::DependencyNotReady(cfssl_name(astarte)));
        }

        let certificate = ctx.ca_source.fetch_ca_certificate(&cfssl_url(astarte)).await?;
        let secret = corev1::Secret {
            metadata: ObjectMeta {
                name: Some(secret_name.clone()),
                namespace: Some(namespace),
                labels: Some(make_labels(&cfssl_name(astarte))),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(
                CFSSL_CA_CERTIFICATE_KEY.to_string(),
                ByteString(certificate.into_bytes()),
            )])),
            type_: Some("Opaque".to_string()),
            ..corev1::Secret::default()
        };
        secret_api.create(&secret).await?;
        info!(secret = %secret_name, "stored the CFSSL CA certificate");
        Ok(())
    }
}

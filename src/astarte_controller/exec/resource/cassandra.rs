// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::*;
use crate::astarte_controller::exec::resource::{common::*, Companion, ComponentBuilder, Workload, WorkloadKind};
use crate::astarte_controller::trusted::spec_types::*;
use crate::Error;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::api::ObjectMeta;

pub const CASSANDRA_DEFAULT_IMAGE: &str = "gcr.io/google-samples/cassandra";
pub const CASSANDRA_DEFAULT_VERSION: &str = "v13";

pub struct CassandraBuilder;

fn make_cassandra_env_vars(astarte: &Astarte) -> Vec<corev1::EnvVar> {
    let name = cassandra_name(astarte);
    let cassandra = &astarte.spec.cassandra;
    vec![
        env_var("MAX_HEAP_SIZE", cassandra.max_heap_size.clone().unwrap_or_else(|| "1024M".to_string())),
        env_var("HEAP_NEWSIZE", cassandra.heap_new_size.clone().unwrap_or_else(|| "256M".to_string())),
        env_var(
            "CASSANDRA_SEEDS",
            format!("{}-0.{}.{}.svc.cluster.local", name, name, astarte_namespace(astarte)),
        ),
        env_var("CASSANDRA_CLUSTER_NAME", name),
        env_var("CASSANDRA_DC", "DC1-Astarte"),
        env_var("CASSANDRA_RACK", "Rack1-Astarte"),
        env_var("CASSANDRA_ENDPOINT_SNITCH", "GossipingPropertyFileSnitch"),
        env_var_from_field("POD_IP", "status.podIP"),
    ]
}

fn make_cassandra_pod_spec(astarte: &Astarte) -> corev1::PodSpec {
    let name = cassandra_name(astarte);
    let generic = &astarte.spec.cassandra.generic;
    corev1::PodSpec {
        termination_grace_period_seconds: Some(1800),
        image_pull_secrets: image_pull_secrets(astarte),
        affinity: make_anti_affinity(generic, &make_labels(&name)),
        containers: vec![corev1::Container {
            name: "cassandra".to_string(),
            image: Some(dependency_image(generic, CASSANDRA_DEFAULT_IMAGE, CASSANDRA_DEFAULT_VERSION)),
            image_pull_policy: image_pull_policy(astarte),
            ports: Some(vec![
                make_container_port("intra-node", 7000),
                make_container_port("tls-intra-node", 7001),
                make_container_port("jmx", 7199),
                make_container_port("cql", 9042),
            ]),
            security_context: Some(corev1::SecurityContext {
                capabilities: Some(corev1::Capabilities {
                    add: Some(vec!["IPC_LOCK".to_string()]),
                    ..corev1::Capabilities::default()
                }),
                ..corev1::SecurityContext::default()
            }),
            lifecycle: Some(corev1::Lifecycle {
                pre_stop: Some(corev1::LifecycleHandler {
                    exec: Some(corev1::ExecAction {
                        command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), "nodetool drain".to_string()]),
                    }),
                    ..corev1::LifecycleHandler::default()
                }),
                ..corev1::Lifecycle::default()
            }),
            readiness_probe: Some(make_exec_probe(&["/bin/bash", "-c", "/ready-probe.sh"], 15, 10)),
            resources: generic.resources.clone(),
            env: Some(make_cassandra_env_vars(astarte)),
            volume_mounts: Some(vec![volume_mount(&(name + "-data"), "/cassandra_data")]),
            ..corev1::Container::default()
        }],
        ..corev1::PodSpec::default()
    }
}

impl ComponentBuilder for CassandraBuilder {
    fn name(&self) -> String {
        "cassandra".to_string()
    }

    fn workload_name(&self, astarte: &Astarte) -> String {
        cassandra_name(astarte)
    }

    fn workload_kind(&self) -> WorkloadKind {
        WorkloadKind::StatefulSet
    }

    fn deploy(&self, astarte: &Astarte) -> bool {
        is_deployed(&astarte.spec.cassandra.generic)
    }

    fn validate(&self, astarte: &Astarte) -> Result<(), Error> {
        let cassandra = &astarte.spec.cassandra;
        if !is_deployed(&cassandra.generic) && cassandra.nodes.as_deref().map_or(true, str::is_empty) {
            return Err(Error::InvalidDefinition {
                component: "Cassandra",
                reason: "when not deploying Cassandra, the nodes must be specified".to_string(),
            });
        }
        Ok(())
    }

    fn companions(&self, astarte: &Astarte) -> Result<Vec<Companion>, Error> {
        let name = cassandra_name(astarte);
        if !self.deploy(astarte) {
            return Ok(Vec::new());
        }
        let labels = make_labels(&name);
        Ok(vec![Companion::Service(make_service(
            astarte,
            name,
            labels.clone(),
            labels,
            vec![make_service_port("cql", 9042)],
            true,
        )?)])
    }

    fn make_workload(&self, astarte: &Astarte) -> Result<Workload, Error> {
        let name = cassandra_name(astarte);
        let labels = make_labels(&name);
        Ok(Workload::StatefulSet(appsv1::StatefulSet {
            metadata: make_object_meta(astarte, name.clone(), labels.clone())?,
            spec: Some(appsv1::StatefulSetSpec {
                service_name: name.clone(),
                replicas: astarte.spec.cassandra.generic.replicas,
                selector: label_selector(&labels),
                template: corev1::PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels.clone()),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(make_cassandra_pod_spec(astarte)),
                },
                volume_claim_templates: Some(vec![make_data_volume_claim_template(
                    astarte,
                    name + "-data",
                    labels,
                    astarte.spec.cassandra.storage.as_ref(),
                    "30G",
                )]),
                ..appsv1::StatefulSetSpec::default()
            }),
            ..appsv1::StatefulSet::default()
        }))
    }
}

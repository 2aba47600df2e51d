// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::*;
use crate::astarte_controller::exec::resource::{common::*, Companion, ComponentBuilder, Workload, WorkloadKind};
use crate::astarte_controller::trusted::spec_types::*;
use crate::Error;
use k8s_openapi::api::apps::v1 as appsv1;
use k8s_openapi::api::core::v1 as corev1;
use kube::api::ObjectMeta;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub const DASHBOARD_CONFIG_KEY: &str = "config.json";

pub struct DashboardBuilder;

/// The `config.json` served to the dashboard. An explicit realm management URL
/// wins over the one derived from the API host.
pub fn make_dashboard_config(astarte: &Astarte) -> Value {
    let dashboard = &astarte.spec.components.dashboard;
    let mut config = Map::new();
    let realm_management_api_url = match dashboard.realm_management_api_url.as_deref() {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => format!(
            "{}/{}/v1/",
            base_api_url(astarte),
            AstarteComponent::RealmManagementApi.service_relative_path()
        ),
    };
    config.insert("realm_management_api_url".to_string(), json!(realm_management_api_url));
    if let Some(realm) = dashboard.default_realm.as_deref().filter(|r| !r.is_empty()) {
        config.insert("default_realm".to_string(), json!(realm));
    }
    let default_auth = dashboard.default_auth.as_deref().filter(|a| !a.is_empty()).unwrap_or("token");
    config.insert("default_auth".to_string(), json!(default_auth));
    let auth = match &dashboard.auth {
        Some(auth) if !auth.is_empty() => auth.clone(),
        _ => vec![AstarteDashboardConfigAuthSpec {
            auth_type: "token".to_string(),
            oauth_api_url: None,
        }],
    };
    config.insert("auth".to_string(), json!(auth));
    Value::Object(config)
}

fn make_dashboard_pod_spec(astarte: &Astarte) -> corev1::PodSpec {
    let component = AstarteComponent::Dashboard;
    let generic = component.generic_spec(astarte);
    corev1::PodSpec {
        termination_grace_period_seconds: Some(30),
        image_pull_secrets: image_pull_secrets(astarte),
        containers: vec![corev1::Container {
            name: "dashboard".to_string(),
            image: Some(astarte_image(astarte, component)),
            image_pull_policy: image_pull_policy(astarte),
            ports: Some(vec![make_container_port("http", 80)]),
            resources: resources_for(astarte, generic),
            env: Some(vec![env_var_from_field("MY_POD_IP", "status.podIP")]),
            volume_mounts: Some(vec![corev1::VolumeMount {
                read_only: Some(true),
                ..volume_mount("config", "/usr/share/nginx/html/user-config")
            }]),
            ..corev1::Container::default()
        }],
        volumes: Some(vec![corev1::Volume {
            name: "config".to_string(),
            config_map: Some(corev1::ConfigMapVolumeSource {
                name: dashboard_config_map_name(astarte),
                items: Some(vec![corev1::KeyToPath {
                    key: DASHBOARD_CONFIG_KEY.to_string(),
                    path: DASHBOARD_CONFIG_KEY.to_string(),
                    ..corev1::KeyToPath::default()
                }]),
                ..corev1::ConfigMapVolumeSource::default()
            }),
            ..corev1::Volume::default()
        }]),
        ..corev1::PodSpec::default()
    }
}

impl ComponentBuilder for DashboardBuilder {
    fn name(&self) -> String {
        AstarteComponent::Dashboard.dashed_str().to_string()
    }

    fn workload_name(&self, astarte: &Astarte) -> String {
        component_name(astarte, AstarteComponent::Dashboard)
    }

    fn workload_kind(&self) -> WorkloadKind {
        WorkloadKind::Deployment
    }

    fn deploy(&self, astarte: &Astarte) -> bool {
        is_deployed(AstarteComponent::Dashboard.generic_spec(astarte))
    }

    fn companions(&self, astarte: &Astarte) -> Result<Vec<Companion>, Error> {
        let name = component_name(astarte, AstarteComponent::Dashboard);
        if !self.deploy(astarte) {
            return Ok(Vec::new());
        }
        let labels = make_component_labels(astarte, AstarteComponent::Dashboard);
        Ok(vec![
            Companion::ConfigMap(make_config_map(
                astarte,
                dashboard_config_map_name(astarte),
                labels.clone(),
                BTreeMap::from([(DASHBOARD_CONFIG_KEY.to_string(), make_dashboard_config(astarte).to_string())]),
            )?),
            Companion::Service(make_service(
                astarte,
                name.clone(),
                labels,
                make_labels(&name),
                vec![make_service_port("http", 80)],
                true,
            )?),
        ])
    }

    fn make_workload(&self, astarte: &Astarte) -> Result<Workload, Error> {
        let name = component_name(astarte, AstarteComponent::Dashboard);
        let labels = make_component_labels(astarte, AstarteComponent::Dashboard);
        Ok(Workload::Deployment(appsv1::Deployment {
            metadata: make_object_meta(astarte, name.clone(), labels.clone())?,
            spec: Some(appsv1::DeploymentSpec {
                replicas: AstarteComponent::Dashboard.generic_spec(astarte).replicas,
                selector: label_selector(&make_labels(&name)),
                strategy: astarte.spec.deployment_strategy.clone(),
                template: corev1::PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(make_dashboard_pod_spec(astarte)),
                },
                ..appsv1::DeploymentSpec::default()
            }),
            ..appsv1::Deployment::default()
        }))
    }
}

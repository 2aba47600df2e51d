// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::*;
use crate::astarte_controller::trusted::spec_types::{Astarte, AstarteClusterHealth};
use crate::kubernetes_api_objects::{common::label_selector_string, typed_api::TypedApi};
use crate::shim_layer::controller_runtime::Data;
use k8s_openapi::api::apps::v1::Deployment;
use tracing::warn;

/// Classifies the cluster by how many of its Astarte Deployments have no ready
/// replica: none is green, one is yellow, more is red.
///
/// None means the Deployments could not be listed and the previous health stands.
pub async fn compute_health(astarte: &Astarte, ctx: &Data) -> Option<AstarteClusterHealth> {
    let namespace = astarte_namespace(astarte);
    let selector = label_selector_string([(COMPONENT_LABEL_KEY, COMPONENT_LABEL_VALUE)]);
    let deployments = match TypedApi::<Deployment>::namespaced(ctx.api.as_ref(), &namespace)
        .list(Some(&selector))
        .await
    {
        Ok(deployments) => deployments,
        Err(e) => {
            warn!(astarte = %astarte_name(astarte), "could not list deployments to compute health: {}", e);
            return None;
        }
    };
    let uid = astarte.metadata.uid.as_deref();
    let unready = deployments
        .iter()
        .filter(|d| owned_by(d, uid))
        .filter(|d| d.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0) == 0)
        .count();
    Some(health_from_unready(unready))
}

pub fn health_from_unready(unready: usize) -> AstarteClusterHealth {
    match unready {
        0 => AstarteClusterHealth::Green,
        1 => AstarteClusterHealth::Yellow,
        _ => AstarteClusterHealth::Red,
    }
}

fn owned_by(deployment: &Deployment, uid: Option<&str>) -> bool {
    let Some(uid) = uid else {
        return false;
    };
    deployment
        .metadata
        .owner_references
        .iter()
        .flatten()
        .any(|owner| owner.uid == uid)
}

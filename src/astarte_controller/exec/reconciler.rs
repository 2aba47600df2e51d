// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::*;
use crate::astarte_controller::exec::{
    finalizer::{add_finalizer, finalize, has_finalizer, remove_finalizer},
    health::compute_health,
    plan::run_plan,
    upgrade::ensure_upgrade,
    version,
};
use crate::astarte_controller::trusted::spec_types::*;
use crate::kubernetes_api_objects::typed_api::TypedApi;
use crate::shim_layer::controller_runtime::Data;
use crate::Error;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::Action;
use tracing::{debug, info};

/// One reconcile pass over the Astarte instance namespace/name.
///
/// The instance is read afresh, so duplicate and stale triggers are harmless.
/// Any failure ends the pass before the status is written.
pub async fn reconcile_astarte(namespace: &str, name: &str, ctx: &Data) -> Result<Action, Error> {
    let api = TypedApi::<Astarte>::namespaced(ctx.api.as_ref(), namespace);
    let Some(mut astarte) = api.get_opt(name).await? else {
        info!(astarte = %name, namespace = %namespace, "Astarte resource not found, it must have been deleted");
        return Ok(Action::await_change());
    };

    let desired_version = version::parse_and_validate(&astarte.spec.version)?;

    if astarte.metadata.deletion_timestamp.is_some() {
        if has_finalizer(&astarte) {
            finalize(&astarte, ctx).await?;
            remove_finalizer(&astarte, ctx).await?;
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer(&astarte) {
        astarte = add_finalizer(&astarte, ctx).await?;
    }

    let mut status = astarte.status.clone().unwrap_or_default();
    if status.astarte_version.is_empty() {
        if let Some(recovered) = recover_astarte_version(&astarte, ctx).await? {
            info!(astarte = %name, version = %recovered, "recovered the running Astarte version");
            status.astarte_version = recovered;
            astarte = persist_status(&astarte, status.clone(), ctx).await?;
        }
    }

    if upgrade_requested(&status.astarte_version, &astarte.spec.version) {
        let health = match status.health {
            Some(health) => Some(health),
            None => compute_health(&astarte, ctx).await,
        };
        if health != Some(AstarteClusterHealth::Green) {
            return Err(Error::UnstableHealth {
                recorded_version: status.astarte_version.clone(),
            });
        }
        let recorded_version = version::parse_recorded(&status.astarte_version)?;
        info!(astarte = %name, from = %recorded_version, to = %desired_version, "upgrading Astarte");
        ensure_upgrade(&recorded_version, &desired_version, &astarte, ctx).await?;
    }

    run_plan(&ctx.plan, &astarte, ctx).await?;

    let health = compute_health(&astarte, ctx).await.or(status.health);
    let reconciled = AstarteStatus {
        astarte_version: astarte.spec.version.clone(),
        operator_version: ctx.config.operator_version.clone(),
        reconciliation_phase: Some(ReconciliationPhase::Reconciled),
        health,
        base_api_url: base_api_url(&astarte),
        broker_url: broker_url(&astarte),
    };
    persist_status(&astarte, reconciled, ctx).await?;
    debug!(astarte = %name, "reconcile pass completed");
    Ok(Action::requeue(ctx.config.resync_period))
}

/// Whether the recorded version differs from the requested one. An unknown or
/// snapshot recorded version never triggers an upgrade.
pub fn upgrade_requested(recorded: &str, desired: &str) -> bool {
    !recorded.is_empty() && recorded != SNAPSHOT_VERSION && recorded != desired
}

/// Reads the version off the image tag of the housekeeping Deployment, for
/// instances deployed before the version was recorded in status.
async fn recover_astarte_version(astarte: &Astarte, ctx: &Data) -> Result<Option<String>, Error> {
    let deployment = TypedApi::<Deployment>::namespaced(ctx.api.as_ref(), &astarte_namespace(astarte))
        .get_opt(&component_name(astarte, AstarteComponent::Housekeeping))
        .await?;
    let Some(deployment) = deployment else {
        return Ok(None);
    };
    let image = deployment
        .spec
        .and_then(|spec| spec.template.spec)
        .and_then(|pod| pod.containers.into_iter().next())
        .and_then(|container| container.image)
        .unwrap_or_default();
    version_from_image(&image).map(Some)
}

pub fn version_from_image(image: &str) -> Result<String, Error> {
    match image.split(':').collect::<Vec<_>>().as_slice() {
        [_, tag] => Ok(tag.to_string()),
        _ => Err(Error::UnrecognizedImage(image.to_string())),
    }
}

async fn persist_status(astarte: &Astarte, status: AstarteStatus, ctx: &Data) -> Result<Astarte, Error> {
    if astarte.status.as_ref() == Some(&status) {
        return Ok(astarte.clone());
    }
    let mut updated = astarte.clone();
    updated.status = Some(status);
    let api = TypedApi::<Astarte>::namespaced(ctx.api.as_ref(), &astarte_namespace(astarte));
    Ok(api.replace_status(&updated).await?)
}

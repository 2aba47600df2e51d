// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::*;
use crate::astarte_controller::exec::resource::{
    self, astarte_service::AstarteServiceBuilder, common::astarte_image, ComponentBuilder,
};
use crate::astarte_controller::exec::version::strip_pre_release;
use crate::astarte_controller::trusted::spec_types::Astarte;
use crate::kubernetes_api_objects::typed_api::TypedApi;
use crate::shim_layer::controller_runtime::Data;
use crate::Error;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use semver::Version;
use tracing::{info, warn};

/// A version-specific migration, run when an upgrade crosses its target version.
///
/// Migrations run again on every pass until the upgrade is recorded, so apply
/// must tell from the cluster state how far it already got.
#[async_trait]
pub trait Migration: Send + Sync {
    fn target(&self) -> Version;

    async fn apply(&self, astarte: &Astarte, ctx: &Data) -> Result<(), Error>;
}

pub fn migrations() -> Vec<Box<dyn Migration>> {
    vec![Box::new(UpgradeTo011)]
}

/// Runs, in ascending order, the migrations whose target lies in (old, new].
pub async fn ensure_upgrade(old: &Version, new: &Version, astarte: &Astarte, ctx: &Data) -> Result<(), Error> {
    let old = strip_pre_release(old);
    let new = strip_pre_release(new);
    let mut pending: Vec<Box<dyn Migration>> = migrations()
        .into_iter()
        .filter(|m| old < m.target() && m.target() <= new)
        .collect();
    pending.sort_by_key(|m| m.target());
    for migration in pending {
        info!(astarte = %astarte_name(astarte), from = %old, target = %migration.target(), "running upgrade migration");
        migration.apply(astarte, ctx).await?;
    }
    Ok(())
}

/// 0.11 changes the database schema, which housekeeping migrates when it boots.
/// Everything else using the database is stopped until it is done.
pub struct UpgradeTo011;

// Data updater plant first: it is the one writing to the database.
const DRAIN_ORDER: [AstarteComponent; 8] = [
    AstarteComponent::DataUpdaterPlant,
    AstarteComponent::HousekeepingApi,
    AstarteComponent::RealmManagement,
    AstarteComponent::RealmManagementApi,
    AstarteComponent::Pairing,
    AstarteComponent::PairingApi,
    AstarteComponent::TriggerEngine,
    AstarteComponent::AppEngineApi,
];

impl UpgradeTo011 {
    async fn drain(&self, astarte: &Astarte, ctx: &Data) -> Result<(), Error> {
        let api = TypedApi::<Deployment>::namespaced(ctx.api.as_ref(), &astarte_namespace(astarte));
        for component in DRAIN_ORDER {
            let name = component_name(astarte, component);
            let Some(mut deployment) = api.get_opt(&name).await? else {
                continue;
            };
            let Some(spec) = deployment.spec.as_mut() else {
                continue;
            };
            if spec.replicas == Some(0) {
                continue;
            }
            spec.replicas = Some(0);
            api.replace(&deployment).await?;
            info!(astarte = %astarte_name(astarte), component = %component, "scaled down for the upgrade");
        }
        Ok(())
    }

    // Whether the Deployment controller rolled housekeeping out to the new image and
    // at least one updated replica is ready.
    async fn housekeeping_migrated(&self, astarte: &Astarte, ctx: &Data) -> Result<bool, Error> {
        let deployment = TypedApi::<Deployment>::namespaced(ctx.api.as_ref(), &astarte_namespace(astarte))
            .get_opt(&component_name(astarte, AstarteComponent::Housekeeping))
            .await?;
        let Some(deployment) = deployment else {
            return Ok(false);
        };
        let expected_image = astarte_image(astarte, AstarteComponent::Housekeeping);
        let runs_new_image = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .and_then(|pod| pod.containers.first())
            .and_then(|container| container.image.as_deref())
            == Some(expected_image.as_str());
        let generation = deployment.metadata.generation.unwrap_or(0);
        let rolled_out = deployment.status.as_ref().map_or(false, |status| {
            status.observed_generation.unwrap_or(0) >= generation
                && status.updated_replicas.unwrap_or(0) >= 1
                && status.ready_replicas.unwrap_or(0) >= 1
        });
        Ok(runs_new_image && rolled_out)
    }
}

#[async_trait]
impl Migration for UpgradeTo011 {
    fn target(&self) -> Version {
        Version::new(0, 11, 0)
    }

    async fn apply(&self, astarte: &Astarte, ctx: &Data) -> Result<(), Error> {
        let housekeeping = AstarteServiceBuilder(AstarteComponent::Housekeeping);
        // Nothing here can migrate the database, and draining would never end.
        if !housekeeping.deploy(astarte) {
            warn!(
                astarte = %astarte_name(astarte),
                target = %self.target(),
                "housekeeping is not deployed, the database migration is left to whoever runs it"
            );
            return Ok(());
        }
        if self.housekeeping_migrated(astarte, ctx).await? {
            return Ok(());
        }
        self.drain(astarte, ctx).await?;
        resource::ensure(&housekeeping, astarte, ctx).await?;
        if self.housekeeping_migrated(astarte, ctx).await? {
            return Ok(());
        }
        Err(Error::UpgradeInProgress {
            target: self.target().to_string(),
            detail: "waiting for housekeeping to migrate the database".to_string(),
        })
    }
}

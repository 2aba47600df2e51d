// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::*;
use crate::astarte_controller::exec::plan::ConvergenceStep;
use crate::astarte_controller::exec::resource::common::make_secret;
use crate::astarte_controller::trusted::spec_types::Astarte;
use crate::kubernetes_api_objects::typed_api::TypedApi;
use crate::shim_layer::controller_runtime::Data;
use crate::Error;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Keeps the housekeeping key pair secrets in existence and consistent.
///
/// The public half is what the cluster uses, so its presence decides whether a
/// pair exists. A private half without its public half is stale and gets removed
/// before a new pair is generated; the private secret is written first so an
/// interrupted pass leaves an orphan that the next pass cleans up.
pub struct HousekeepingKeyStep;

#[async_trait]
impl ConvergenceStep for HousekeepingKeyStep {
    fn name(&self) -> String {
        "housekeeping-key".to_string()
    }

    async fn ensure(&self, astarte: &Astarte, ctx: &Data) -> Result<(), Error> {
        let namespace = astarte_namespace(astarte);
        let secret_api = TypedApi::<Secret>::namespaced(ctx.api.as_ref(), &namespace);
        let public_name = housekeeping_public_key_secret_name(astarte);
        let private_name = housekeeping_private_key_secret_name(astarte);

        if secret_api.get_opt(&public_name).await?.is_some() {
            return Ok(());
        }

        if secret_api.delete_opt(&private_name).await? {
            warn!(secret = %private_name, "deleted a private key without its public key");
        }

        info!(astarte = %astarte_name(astarte), "generating the housekeeping key pair");
        let generator = ctx.key_generator.clone();
        let key_pair = tokio::task::spawn_blocking(move || generator.generate())
            .await
            .map_err(|e| Error::KeyGenerationFailed(e.to_string()))??;
        let labels = make_labels(&astarte_name(astarte));
        let private_secret = make_secret(
            astarte,
            private_name,
            labels.clone(),
            BTreeMap::from([(HOUSEKEEPING_PRIVATE_KEY.to_string(), key_pair.private_pem)]),
        )?;
        let public_secret = make_secret(
            astarte,
            public_name,
            labels,
            BTreeMap::from([(HOUSEKEEPING_PUBLIC_KEY.to_string(), key_pair.public_pem)]),
        )?;
        // Both halves come from the same generation, so neither may be adopted.
        secret_api.create(&private_secret).await?;
        secret_api.create(&public_secret).await?;
        Ok(())
    }
}

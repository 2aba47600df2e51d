// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::*;
use crate::astarte_controller::trusted::spec_types::Astarte;
use crate::kubernetes_api_objects::typed_api::TypedApi;
use crate::shim_layer::controller_runtime::Data;
use crate::Error;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret};
use tracing::{error, info};

pub fn has_finalizer(astarte: &Astarte) -> bool {
    astarte
        .metadata
        .finalizers
        .iter()
        .flatten()
        .any(|f| f == ASTARTE_FINALIZER)
}

/// Attaches the finalizer and returns the stored instance.
pub async fn add_finalizer(astarte: &Astarte, ctx: &Data) -> Result<Astarte, Error> {
    info!(astarte = %astarte_name(astarte), "adding finalizer");
    let mut updated = astarte.clone();
    updated
        .metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(ASTARTE_FINALIZER.to_string());
    let api = TypedApi::<Astarte>::namespaced(ctx.api.as_ref(), &astarte_namespace(astarte));
    Ok(api.replace(&updated).await?)
}

pub async fn remove_finalizer(astarte: &Astarte, ctx: &Data) -> Result<(), Error> {
    let mut updated = astarte.clone();
    if let Some(finalizers) = updated.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != ASTARTE_FINALIZER);
    }
    let api = TypedApi::<Astarte>::namespaced(ctx.api.as_ref(), &astarte_namespace(astarte));
    match api.replace(&updated).await {
        Ok(_) => Ok(()),
        // Removing the last finalizer may have released the object already.
        Err(e) if e.is_object_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Cleans up what garbage collection does not reach: the CFSSL CA secret, which
/// carries no owner reference, and the claims of the dependencies' data volumes.
///
/// Failing to delete one of them is logged and tolerated; failing to list the
/// claims is not.
pub async fn finalize(astarte: &Astarte, ctx: &Data) -> Result<(), Error> {
    let name = astarte_name(astarte);
    let namespace = astarte_namespace(astarte);
    info!(astarte = %name, namespace = %namespace, "finalizing Astarte");

    let ca_secret = cfssl_ca_secret_name(astarte);
    if let Err(e) = TypedApi::<Secret>::namespaced(ctx.api.as_ref(), &namespace)
        .delete_opt(&ca_secret)
        .await
    {
        error!(astarte = %name, secret = %ca_secret, "CFSSL CA secret will need to be manually removed: {}", e);
    }

    let pvc_api = TypedApi::<PersistentVolumeClaim>::namespaced(ctx.api.as_ref(), &namespace);
    let claims = match pvc_api.list(None).await {
        Ok(claims) => claims,
        Err(e) if e.is_object_not_found() => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    let prefixes = persistent_volume_claim_prefixes(astarte);
    for claim in claims {
        let Some(claim_name) = claim.metadata.name else {
            continue;
        };
        if !prefixes.iter().any(|prefix| claim_name.starts_with(prefix.as_str())) {
            continue;
        }
        if let Err(e) = pvc_api.delete_opt(&claim_name).await {
            error!(astarte = %name, pvc = %claim_name, "PersistentVolumeClaim will need to be manually removed: {}", e);
        }
    }

    info!(astarte = %name, "successfully finalized Astarte");
    Ok(())
}

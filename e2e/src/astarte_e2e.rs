// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::*;
use astarte_controller::astarte_controller::common::{
    component_name, persistent_volume_claim_prefixes, AstarteComponent, COMPONENT_LABEL_KEY, COMPONENT_LABEL_VALUE,
};
use astarte_controller::astarte_controller::trusted::spec_types::Astarte;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams},
    discovery::Discovery,
    Client, ResourceExt,
};
use serde_json::json;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::time::sleep;

const DEPLOY_TIMEOUT: Duration = Duration::from_secs(1200);

fn image_tag(deployment: &Deployment) -> Option<String> {
    let image = deployment
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .image
        .clone()?;
    image.rsplit_once(':').map(|(_, tag)| tag.to_string())
}

async fn check_astarte_deployments(client: Client, astarte: &Astarte, version: &str) -> Result<(), Error> {
    let namespace = astarte.namespace().unwrap_or_default();
    let deployments: Api<Deployment> = Api::namespaced(client, &namespace);
    for component in AstarteComponent::ALL {
        let name = component_name(astarte, component);
        let deployment = deployments.get(&name).await?;
        if image_tag(&deployment).as_deref() != Some(version) {
            println!("Deployment {} does not run Astarte {}! e2e_test failed!\n", name, version);
            return Err(Error::AstarteDeploymentFailed(name));
        }
        if deployment.owner_references().iter().all(|o| o.uid != astarte.uid().unwrap_or_default()) {
            println!("Deployment {} is not owned by {}! e2e_test failed!\n", name, astarte.name_any());
            return Err(Error::AstarteDeploymentFailed(name));
        }
    }
    Ok(())
}

pub async fn astarte_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    check_crd(client.clone()).await?;

    let discovery = Discovery::new(client.clone()).run().await?;
    let astarte_name = apply_file(PathBuf::from("./manifests/astarte.yaml"), client.clone(), &discovery).await?;
    let astarte_api: Api<Astarte> = Api::default_namespaced(client.clone());
    let astarte = wait_for_astarte(&astarte_api, &astarte_name, "0.11.0", DEPLOY_TIMEOUT).await?;
    check_astarte_deployments(client.clone(), &astarte, "0.11.0").await?;

    let statefulsets: Api<StatefulSet> = Api::default_namespaced(client.clone());
    for dependency in ["vernemq", "rabbitmq", "cfssl", "cassandra"] {
        statefulsets.get(&format!("{}-{}", astarte_name, dependency)).await?;
    }
    println!("Astarte cluster is ready! e2e test passed\n");
    Ok(())
}

pub async fn astarte_upgrade_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    check_crd(client.clone()).await?;

    let discovery = Discovery::new(client.clone()).run().await?;
    let astarte_name = apply_file(PathBuf::from("./manifests/astarte-0.10.yaml"), client.clone(), &discovery).await?;
    let astarte_api: Api<Astarte> = Api::default_namespaced(client.clone());
    wait_for_astarte(&astarte_api, &astarte_name, "0.10.2", DEPLOY_TIMEOUT).await?;

    let patch = json!({"spec": {"version": "0.11.0"}});
    astarte_api
        .patch(&astarte_name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    println!("Requested the upgrade of {} to 0.11.0\n", astarte_name);

    let astarte = match wait_for_astarte(&astarte_api, &astarte_name, "0.11.0", DEPLOY_TIMEOUT).await {
        Ok(astarte) => astarte,
        Err(Error::Timeout) => return Err(Error::AstarteUpgradeFailed("0.11.0".to_string())),
        Err(e) => return Err(e),
    };
    check_astarte_deployments(client.clone(), &astarte, "0.11.0").await?;
    println!("Astarte cluster is upgraded! e2e test passed\n");
    Ok(())
}

pub async fn astarte_deletion_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    check_crd(client.clone()).await?;

    let discovery = Discovery::new(client.clone()).run().await?;
    let astarte_name = apply_file(PathBuf::from("./manifests/astarte.yaml"), client.clone(), &discovery).await?;
    let astarte_api: Api<Astarte> = Api::default_namespaced(client.clone());
    let astarte = wait_for_astarte(&astarte_api, &astarte_name, "0.11.0", DEPLOY_TIMEOUT).await?;

    astarte_api.delete(&astarte_name, &DeleteParams::default()).await?;
    let prefixes = persistent_volume_claim_prefixes(&astarte);
    let claims: Api<PersistentVolumeClaim> = Api::default_namespaced(client.clone());
    let deployments: Api<Deployment> = Api::default_namespaced(client.clone());
    let selector = ListParams::default().labels(&format!("{}={}", COMPONENT_LABEL_KEY, COMPONENT_LABEL_VALUE));

    let start = Instant::now();
    loop {
        sleep(Duration::from_secs(5)).await;
        if start.elapsed() > Duration::from_secs(600) {
            run_command("kubectl", vec!["get", "all,pvc,secrets"]);
            return Err(Error::AstarteCleanupFailed(astarte_name));
        }
        if astarte_api.get_opt(&astarte_name).await?.is_some() {
            println!("Astarte {} is still there, continue to wait!\n", astarte_name);
            continue;
        }
        let leftover_claims = claims
            .list(&ListParams::default())
            .await?
            .into_iter()
            .filter(|claim| prefixes.iter().any(|prefix| claim.name_any().starts_with(prefix.as_str())))
            .count();
        let leftover_deployments = deployments.list(&selector).await?.items.len();
        if leftover_claims > 0 || leftover_deployments > 0 {
            println!(
                "{} claims and {} deployments left, continue to wait!\n",
                leftover_claims, leftover_deployments
            );
            continue;
        }
        break;
    }
    println!("Astarte cluster is cleaned up! e2e test passed\n");
    Ok(())
}

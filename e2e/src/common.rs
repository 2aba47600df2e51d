// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use astarte_controller::astarte_controller::trusted::spec_types::{Astarte, AstarteClusterHealth, ReconciliationPhase};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, DynamicObject, Patch, PatchParams, ResourceExt},
    core::GroupVersionKind,
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
    Client,
};
use std::process::Command;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;

pub const ASTARTE_CRD_NAME: &str = "astartes.api.astarte-platform.org";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to talk to the cluster: {0}")]
    ClientGetFailed(#[from] kube::Error),

    #[error("Failed to apply yaml file!")]
    ApplyFailed,

    #[error("Failed to parse the yaml file!")]
    ParseYamlFailed(#[from] serde_yaml::Error),

    #[error("Failed to parse the json format!")]
    ParseJsonFailed(#[from] serde_json::Error),

    #[error("Failed to find the yaml file in provided path!")]
    GVKFailed(#[from] std::io::Error),

    #[error("Failed to get CRD: {0}")]
    CRDGetFailed(#[source] kube::Error),

    #[error("Timeout, e2e test failed!")]
    Timeout,

    #[error("Deployment {0} is not consistent with the Astarte spec!")]
    AstarteDeploymentFailed(String),

    #[error("Astarte was not upgraded to {0}!")]
    AstarteUpgradeFailed(String),

    #[error("Astarte left {0} behind after deletion!")]
    AstarteCleanupFailed(String),
}

pub async fn check_crd(client: Client) -> Result<(), Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client);
    match crds.get(ASTARTE_CRD_NAME).await {
        Err(e) => {
            println!("No CRD found, create one before run the e2e test!\n");
            Err(Error::CRDGetFailed(e))
        }
        Ok(_) => {
            println!("CRD found, continue to run the e2e test!\n");
            Ok(())
        }
    }
}

pub async fn apply_file(pth: std::path::PathBuf, client: Client, discovery: &Discovery) -> Result<String, Error> {
    let yaml = std::fs::read_to_string(&pth)?;
    apply(yaml, client, discovery).await
}

pub async fn apply(yaml: String, client: Client, discovery: &Discovery) -> Result<String, Error> {
    let ssapply = PatchParams::apply("astarte-e2e").force();
    let doc = serde_yaml::from_str(&yaml)?;

    let obj: DynamicObject = serde_yaml::from_value(doc)?;
    let namespace = obj.metadata.namespace.as_deref();
    let gvk = match obj.types.as_ref().map(GroupVersionKind::try_from) {
        Some(Ok(gvk)) => gvk,
        _ => {
            println!("cannot apply object without valid TypeMeta {:?}", obj);
            return Err(Error::ApplyFailed);
        }
    };
    let name = obj.name_any();
    if let Some((ar, caps)) = discovery.resolve_gvk(&gvk) {
        let api = dynamic_api(ar, caps, client.clone(), namespace);
        println!("Applying {}: \n{}", gvk.kind, serde_yaml::to_string(&obj)?);
        let data: serde_json::Value = serde_json::to_value(&obj)?;
        let _r = api.patch(&name, &ssapply, &Patch::Apply(data)).await?;
        println!("applied {} {}", gvk.kind, name);
    } else {
        println!("Cannot apply document for unknown {:?}", gvk);
        return Err(Error::ApplyFailed);
    }

    Ok(name)
}

fn dynamic_api(ar: ApiResource, caps: ApiCapabilities, client: Client, ns: Option<&str>) -> Api<DynamicObject> {
    if caps.scope == Scope::Cluster {
        Api::all_with(client, &ar)
    } else if let Some(namespace) = ns {
        Api::namespaced_with(client, namespace, &ar)
    } else {
        Api::default_namespaced_with(client, &ar)
    }
}

/// Polls until the instance reports version, a reconciled phase and a green health.
pub async fn wait_for_astarte(api: &Api<Astarte>, name: &str, version: &str, timeout: Duration) -> Result<Astarte, Error> {
    let start = Instant::now();
    loop {
        sleep(Duration::from_secs(5)).await;
        if start.elapsed() > timeout {
            return Err(Error::Timeout);
        }
        let astarte = match api.get_opt(name).await? {
            Some(astarte) => astarte,
            None => {
                println!("No Astarte {} found, continue to wait!\n", name);
                continue;
            }
        };
        let Some(status) = astarte.status.clone() else {
            println!("Astarte {} has no status yet, continue to wait!\n", name);
            continue;
        };
        if status.astarte_version != version
            || status.reconciliation_phase != Some(ReconciliationPhase::Reconciled)
            || status.health != Some(AstarteClusterHealth::Green)
        {
            println!(
                "Astarte {} is at {:?} with phase {:?} and health {:?}, continue to wait!\n",
                name, status.astarte_version, status.reconciliation_phase, status.health
            );
            continue;
        }
        return Ok(astarte);
    }
}

pub fn run_command(program: &str, args: Vec<&str>) -> (String, String) {
    println!("{} {}", program, args.join(" "));
    match Command::new(program).args(args).output() {
        Ok(cmd) => {
            println!("cmd output: {}", String::from_utf8_lossy(&cmd.stdout));
            println!("cmd error: {}", String::from_utf8_lossy(&cmd.stderr));
            (
                String::from_utf8_lossy(&cmd.stdout).to_string(),
                String::from_utf8_lossy(&cmd.stderr).to_string(),
            )
        }
        Err(e) => (String::new(), e.to_string()),
    }
}

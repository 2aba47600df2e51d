// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::exec::{
    ca_source::CaCertificateSource,
    credentials::KeyPairGenerator,
    plan::{astarte_plan, ConvergencePlan},
    reconciler::reconcile_astarte,
};
use crate::astarte_controller::trusted::spec_types::Astarte;
use crate::shim_layer::api_server::ApiServer;
use crate::{Error, RequeuePolicy};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use kube::{
    api::Api,
    runtime::{
        controller::{Action, Controller},
        watcher,
    },
    Client, Resource,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};

// The shim layer connects the reconciler to the kube-rs controller runtime.
// kube-rs watches the Astarte resources and the objects they own, and calls
// reconcile whenever one of them changes or the requeue delay expires; the
// reconciler reaches the cluster only through the ApiServer in Data.

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Delay before the next pass after a successful one.
    pub resync_period: Duration,
    /// Delay before retrying a pass that failed with a transient error.
    pub error_backoff: Duration,
    /// Recorded in the status of every reconciled instance.
    pub operator_version: String,
}

impl Default for ControllerConfig {
    fn default() -> ControllerConfig {
        ControllerConfig {
            resync_period: Duration::from_secs(60),
            error_backoff: Duration::from_secs(10),
            operator_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// Data is passed to every reconcile.
pub struct Data {
    pub api: Arc<dyn ApiServer>,
    pub key_generator: Arc<dyn KeyPairGenerator>,
    pub ca_source: Arc<dyn CaCertificateSource>,
    pub plan: ConvergencePlan,
    pub config: ControllerConfig,
}

impl Data {
    pub fn new(
        api: Arc<dyn ApiServer>,
        key_generator: Arc<dyn KeyPairGenerator>,
        ca_source: Arc<dyn CaCertificateSource>,
        config: ControllerConfig,
    ) -> Data {
        Data {
            api,
            key_generator,
            ca_source,
            plan: astarte_plan(),
            config,
        }
    }
}

// run_controller runs the controller until a termination signal arrives.
// Without a namespace it watches the whole cluster.
pub async fn run_controller(client: Client, namespace: Option<String>, data: Data) -> anyhow::Result<()> {
    let astartes = scoped_api::<Astarte>(&client, namespace.as_deref());
    let deployments = scoped_api::<Deployment>(&client, namespace.as_deref());
    let stateful_sets = scoped_api::<StatefulSet>(&client, namespace.as_deref());

    info!(namespace = namespace.as_deref().unwrap_or("*"), "starting controller");
    Controller::new(astartes, watcher::Config::default())
        .owns(deployments, watcher::Config::default())
        .owns(stateful_sets, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::new(data))
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => info!(astarte = %obj.name, namespace = ?obj.namespace, ?action, "reconciled"),
                Err(e) => warn!("reconcile failed: {}", e),
            }
        })
        .await;
    info!("controller terminated");
    Ok(())
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

// reconcile is invoked by kube-rs for every event on an Astarte or an object it owns.
pub async fn reconcile(astarte: Arc<Astarte>, ctx: Arc<Data>) -> Result<Action, Error> {
    let name = astarte
        .metadata
        .name
        .as_deref()
        .ok_or(Error::MissingObjectKey(".metadata.name"))?;
    let namespace = astarte
        .metadata
        .namespace
        .as_deref()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    reconcile_astarte(namespace, name, &ctx)
        .instrument(info_span!("reconcile", astarte = %name, namespace = %namespace))
        .await
}

// error_policy defines the controller's behavior when the reconcile ends with an error.
pub fn error_policy(astarte: Arc<Astarte>, error: &Error, ctx: Arc<Data>) -> Action {
    let name = astarte.metadata.name.as_deref().unwrap_or_default();
    match error.requeue_policy() {
        RequeuePolicy::Never => {
            warn!(astarte = %name, "reconcile failed, waiting for a change to the resource: {}", error);
            Action::await_change()
        }
        RequeuePolicy::After(delay) => {
            warn!(astarte = %name, ?delay, "reconcile failed: {}", error);
            Action::requeue(delay)
        }
        RequeuePolicy::Backoff => {
            warn!(astarte = %name, "reconcile failed, will retry: {}", error);
            Action::requeue(ctx.config.error_backoff)
        }
    }
}

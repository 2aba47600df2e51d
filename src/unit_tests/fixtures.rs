// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::exec::{
    ca_source::CaCertificateSource,
    credentials::{KeyPair, KeyPairGenerator},
    reconciler::reconcile_astarte,
};
use crate::astarte_controller::trusted::spec_types::*;
use crate::executable_model::api_server::ExecutableApiServer;
use crate::kubernetes_api_objects::dynamic::KubeResource;
use crate::shim_layer::{
    api_server::ApiServer,
    controller_runtime::{ControllerConfig, Data},
    fault_injection::FaultInjectingApiServer,
};
use crate::Error;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus, StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const NAMESPACE: &str = "astarte";
pub const NAME: &str = "example";
pub const API_HOST: &str = "api.astarte.example.com";
pub const BROKER_HOST: &str = "broker.astarte.example.com";
pub const TEST_CA_PEM: &str = "-----BEGIN CERTIFICATE-----\ntest-ca\n-----END CERTIFICATE-----\n";

const MAX_PASSES: usize = 10;

/// Hands out numbered key pairs, so tests can tell which generation a half comes from.
#[derive(Default)]
pub struct FakeKeyPairGenerator {
    generated: AtomicUsize,
}

impl KeyPairGenerator for FakeKeyPairGenerator {
    fn generate(&self) -> Result<KeyPair, Error> {
        let n = self.generated.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(KeyPair {
            private_pem: format!("private-{}", n),
            public_pem: format!("public-{}", n),
        })
    }
}

pub struct FakeCaSource;

#[async_trait]
impl CaCertificateSource for FakeCaSource {
    async fn fetch_ca_certificate(&self, _cfssl_url: &str) -> Result<String, Error> {
        Ok(TEST_CA_PEM.to_string())
    }
}

pub fn make_astarte(version: &str) -> Astarte {
    let mut astarte = Astarte::new(
        NAME,
        AstarteSpec {
            version: version.to_string(),
            api: AstarteApiSpec {
                host: API_HOST.to_string(),
                ssl: None,
            },
            vernemq: AstarteVerneMqSpec {
                host: BROKER_HOST.to_string(),
                ..AstarteVerneMqSpec::default()
            },
            ..AstarteSpec::default()
        },
    );
    astarte.metadata.namespace = Some(NAMESPACE.to_string());
    astarte
}

fn make_data(api: Arc<dyn ApiServer>) -> Data {
    Data::new(
        api,
        Arc::new(FakeKeyPairGenerator::default()),
        Arc::new(FakeCaSource),
        ControllerConfig::default(),
    )
}

/// An in-memory cluster with the controller wired to it.
///
/// The tests play the part of the built-in controllers: `mark_all_ready` does what
/// the Deployment and StatefulSet controllers would report once pods are up.
pub struct TestCluster {
    pub server: Arc<ExecutableApiServer>,
    pub data: Data,
    pub fault: Option<Arc<FaultInjectingApiServer<Arc<ExecutableApiServer>>>>,
}

impl TestCluster {
    pub fn new() -> TestCluster {
        let server = Arc::new(ExecutableApiServer::new());
        let data = make_data(server.clone());
        TestCluster {
            server,
            data,
            fault: None,
        }
    }

    /// A cluster whose n-th write is applied and then reported as failed.
    /// n = 0 only counts the writes.
    pub fn crashing_after(n: u64) -> TestCluster {
        let server = Arc::new(ExecutableApiServer::new());
        let fault = Arc::new(FaultInjectingApiServer::new(server.clone(), n));
        let data = make_data(fault.clone());
        TestCluster {
            server,
            data,
            fault: Some(fault),
        }
    }

    pub fn writes(&self) -> u64 {
        self.fault.as_ref().map_or(0, |fault| fault.writes())
    }

    pub fn create_astarte(&self, astarte: &Astarte) -> Astarte {
        self.server.insert_object(NAMESPACE, astarte).unwrap()
    }

    pub fn astarte(&self) -> Option<Astarte> {
        self.get::<Astarte>(NAME)
    }

    pub fn status(&self) -> AstarteStatus {
        self.astarte().and_then(|astarte| astarte.status).unwrap_or_default()
    }

    pub fn update_spec(&self, f: impl FnOnce(&mut AstarteSpec)) {
        self.server
            .mutate_object::<Astarte>(NAMESPACE, NAME, |astarte| f(&mut astarte.spec))
            .unwrap();
    }

    pub fn get<K: KubeResource>(&self, name: &str) -> Option<K> {
        self.server.get_object::<K>(NAMESPACE, name)
    }

    pub fn secret_value(&self, name: &str, key: &str) -> Option<String> {
        let secret = self.get::<Secret>(name)?;
        let value = secret.data?.remove(key)?;
        String::from_utf8(value.0).ok()
    }

    pub async fn reconcile(&self) -> Result<Action, Error> {
        reconcile_astarte(NAMESPACE, NAME, &self.data).await
    }

    /// Runs passes until the controller stops waiting on the cluster, reporting
    /// every workload as rolled out in between.
    pub async fn converge(&self) -> Result<Action, Error> {
        let mut result = self.reconcile().await;
        for _ in 0..MAX_PASSES {
            match &result {
                Err(Error::DependencyNotReady(_)) | Err(Error::UpgradeInProgress { .. }) => {
                    self.mark_all_ready();
                    result = self.reconcile().await;
                }
                _ => break,
            }
        }
        result
    }

    /// Creates the instance and brings it to a reconciled, green state.
    pub async fn deploy(&self, astarte: &Astarte) {
        self.create_astarte(astarte);
        self.converge().await.unwrap();
        self.mark_all_ready();
        self.reconcile().await.unwrap();
        assert_eq!(Some(AstarteClusterHealth::Green), self.status().health);
    }

    pub fn mark_all_ready(&self) {
        for key in self.server.object_refs() {
            match key.kind.as_str() {
                "Deployment" => self.roll_out_deployment(&key.name),
                "StatefulSet" => self.roll_out_stateful_set(&key.name),
                _ => {}
            }
        }
    }

    pub fn roll_out_deployment(&self, name: &str) {
        let Some(deployment) = self.get::<Deployment>(name) else {
            return;
        };
        let replicas = deployment.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
        let status = DeploymentStatus {
            observed_generation: deployment.metadata.generation,
            replicas: Some(replicas),
            updated_replicas: Some(replicas),
            ready_replicas: Some(replicas),
            available_replicas: Some(replicas),
            ..DeploymentStatus::default()
        };
        if deployment.status.as_ref() == Some(&status) {
            return;
        }
        self.server
            .mutate_object::<Deployment>(NAMESPACE, name, |d| d.status = Some(status))
            .unwrap();
    }

    pub fn roll_out_stateful_set(&self, name: &str) {
        let Some(stateful_set) = self.get::<StatefulSet>(name) else {
            return;
        };
        let replicas = stateful_set.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
        let status = StatefulSetStatus {
            observed_generation: stateful_set.metadata.generation,
            replicas,
            ready_replicas: Some(replicas),
            available_replicas: Some(replicas),
            ..StatefulSetStatus::default()
        };
        if stateful_set.status.as_ref() == Some(&status) {
            return;
        }
        self.server
            .mutate_object::<StatefulSet>(NAMESPACE, name, |s| s.status = Some(status))
            .unwrap();
    }

    /// Reports the Deployment as having lost all its ready replicas.
    pub fn break_deployment(&self, name: &str) {
        self.server
            .mutate_object::<Deployment>(NAMESPACE, name, |d| {
                let status = d.status.get_or_insert_with(DeploymentStatus::default);
                status.ready_replicas = Some(0);
                status.available_replicas = Some(0);
            })
            .unwrap();
    }
}

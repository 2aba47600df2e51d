// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::common::*;
use crate::astarte_controller::exec::resource::common::astarte_image;
use crate::astarte_controller::trusted::spec_types::*;
use crate::kubernetes_api_objects::{
    common::KubeObjectRef,
    error::{APIError, APIRequestError},
    typed_api::TypedApi,
};
use crate::unit_tests::fixtures::*;
use crate::{Error, RequeuePolicy, SLOW_REQUEUE_DELAY};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Container, PersistentVolumeClaim, PodSpec, PodTemplateSpec, Secret, Service};
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use std::collections::BTreeMap;
use std::time::Duration;

// Tests for a reconcile pass end to end

fn make_housekeeping_deployment(image: &str) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(format!("{}-housekeeping", NAME)),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec {
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "housekeeping".to_string(),
                        image: Some(image.to_string()),
                        ..Container::default()
                    }],
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        status: Some(DeploymentStatus {
            replicas: Some(1),
            ready_replicas: Some(1),
            ..DeploymentStatus::default()
        }),
        ..Deployment::default()
    }
}

fn make_claim(name: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        ..PersistentVolumeClaim::default()
    }
}

fn image_of(cluster: &TestCluster, name: &str) -> Option<String> {
    cluster
        .get::<Deployment>(name)?
        .spec?
        .template
        .spec?
        .containers
        .first()?
        .image
        .clone()
}

fn housekeeping_image(cluster: &TestCluster) -> Option<String> {
    image_of(cluster, "example-housekeeping")
}

fn replicas_of(cluster: &TestCluster, name: &str) -> Option<i32> {
    cluster.get::<Deployment>(name)?.spec?.replicas
}

#[test]
pub fn test_requeue_policy() {
    println!("Testing requeue_policy()...");
    let unsupported = Error::UnsupportedVersion {
        version: "0.9.0".to_string(),
        constraint: SUPPORTED_VERSION_CONSTRAINT,
    };
    assert_eq!(RequeuePolicy::Never, unsupported.requeue_policy());
    let unstable = Error::UnstableHealth {
        recorded_version: "0.10.0".to_string(),
    };
    assert_eq!(RequeuePolicy::Never, unstable.requeue_policy());
    let invalid = Error::InvalidVersion {
        version: "latest".to_string(),
        reason: "not a version".to_string(),
    };
    assert_eq!(RequeuePolicy::After(SLOW_REQUEUE_DELAY), invalid.requeue_policy());
    // A migration resumes from what it finds in the cluster, so it is always retried.
    let in_progress = Error::UpgradeInProgress {
        target: "0.11.0".to_string(),
        detail: "waiting for housekeeping".to_string(),
    };
    assert_eq!(RequeuePolicy::Backoff, in_progress.requeue_policy());
    let failed_drain = Error::KubeApi(APIRequestError::new(
        "replace",
        "Deployment/astarte/example-pairing",
        APIError::InternalError,
    ));
    assert_eq!(RequeuePolicy::Backoff, failed_drain.requeue_policy());
}

#[tokio::test]
pub async fn test_missing_instance_is_not_an_error() {
    println!("Testing reconcile of a deleted instance...");
    let cluster = TestCluster::new();
    let action = cluster.reconcile().await.unwrap();
    assert_eq!(Action::await_change(), action);
    assert_eq!(0, cluster.server.object_count());
}

#[tokio::test]
pub async fn test_unparsable_version_is_retried_slowly() {
    println!("Testing reconcile of an unparsable version...");
    let cluster = TestCluster::new();
    cluster.create_astarte(&make_astarte("not-a-version"));
    let err = cluster.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::InvalidVersion { .. }));
    assert_eq!(RequeuePolicy::After(SLOW_REQUEUE_DELAY), err.requeue_policy());
    assert_eq!(1, cluster.server.object_count());
}

#[tokio::test]
pub async fn test_unsupported_version_creates_nothing() {
    println!("Testing reconcile of an unsupported version...");
    let cluster = TestCluster::new();
    cluster.create_astarte(&make_astarte("0.9.0"));
    let err = cluster.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedVersion { .. }));
    assert_eq!(RequeuePolicy::Never, err.requeue_policy());
    assert_eq!(1, cluster.server.object_count());
    let astarte = cluster.astarte().unwrap();
    assert!(astarte.metadata.finalizers.is_none());
    assert!(astarte.status.is_none());
}

#[tokio::test]
pub async fn test_pre_release_version_is_deployed() {
    println!("Testing reconcile of a pre-release version...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.11.0-beta.1")).await;
    assert_eq!(
        Some("astarte/astarte_housekeeping:0.11.0-beta.1".to_string()),
        housekeeping_image(&cluster)
    );
    assert_eq!("0.11.0-beta.1", cluster.status().astarte_version);
}

#[tokio::test]
pub async fn test_first_deploy() {
    println!("Testing the first deploy of an instance...");
    let cluster = TestCluster::new();
    cluster.create_astarte(&make_astarte("0.11.0"));

    // CFSSL has to run before its CA can be published.
    let err = cluster.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::DependencyNotReady(_)));
    assert!(cluster.get::<StatefulSet>("example-cfssl").is_some());
    assert!(cluster.get::<Deployment>("example-housekeeping").is_none());
    let astarte = cluster.astarte().unwrap();
    assert_eq!(Some(vec![ASTARTE_FINALIZER.to_string()]), astarte.metadata.finalizers);

    cluster.mark_all_ready();
    let action = cluster.reconcile().await.unwrap();
    assert_eq!(Action::requeue(Duration::from_secs(60)), action);

    for component in AstarteComponent::ALL {
        let name = format!("{}-{}", NAME, component.dashed_str());
        let deployment = cluster.get::<Deployment>(&name).unwrap();
        let owners = deployment.metadata.owner_references.unwrap();
        assert_eq!(1, owners.len());
        assert_eq!(astarte.metadata.uid, Some(owners[0].uid.clone()));
        assert_eq!(Some(true), owners[0].controller);
    }
    for dependency in ["rabbitmq", "cassandra", "cfssl", "vernemq"] {
        assert!(cluster.get::<StatefulSet>(&format!("{}-{}", NAME, dependency)).is_some());
    }
    for api in ["housekeeping-api", "realm-management-api", "pairing-api", "appengine-api"] {
        assert!(cluster.get::<Service>(&format!("{}-{}", NAME, api)).is_some());
    }
    assert_eq!(Some(TEST_CA_PEM.to_string()), cluster.secret_value("example-cfssl-ca", "tls.crt"));
    assert!(cluster.get::<ConfigMap>("example-generic-erlang-configuration").is_some());
    assert!(cluster.get::<ConfigMap>("example-dashboard-config").is_some());

    let status = cluster.status();
    assert_eq!("0.11.0", status.astarte_version);
    assert_eq!(env!("CARGO_PKG_VERSION"), status.operator_version);
    assert_eq!(Some(ReconciliationPhase::Reconciled), status.reconciliation_phase);
    assert_eq!(format!("https://{}", API_HOST), status.base_api_url);
    assert_eq!(format!("mqtts://{}:8883", BROKER_HOST), status.broker_url);
    // Nothing reports ready replicas yet.
    assert_eq!(Some(AstarteClusterHealth::Red), status.health);

    cluster.mark_all_ready();
    cluster.reconcile().await.unwrap();
    assert_eq!(Some(AstarteClusterHealth::Green), cluster.status().health);
}

#[tokio::test]
pub async fn test_converged_pass_writes_nothing() {
    println!("Testing a pass over a converged instance...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.11.0")).await;
    let resource_version = cluster.server.resource_version_counter();
    let objects = cluster.server.object_refs();

    cluster.reconcile().await.unwrap();
    cluster.reconcile().await.unwrap();
    assert_eq!(resource_version, cluster.server.resource_version_counter());
    assert_eq!(objects, cluster.server.object_refs());
}

#[tokio::test]
pub async fn test_drift_is_restored() {
    println!("Testing the restore of modified and deleted objects...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.11.0")).await;

    cluster
        .server
        .mutate_object::<ConfigMap>(NAMESPACE, "example-generic-erlang-configuration", |cm| {
            cm.data = Some(BTreeMap::from([("vm.args".to_string(), "-name edited".to_string())]));
            cm.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert("team".to_string(), "ops".to_string());
        })
        .unwrap();
    cluster
        .server
        .mutate_object::<Deployment>(NAMESPACE, "example-pairing-api", |d| {
            if let Some(spec) = d.spec.as_mut() {
                spec.replicas = Some(5);
            }
        })
        .unwrap();
    TypedApi::<Deployment>::namespaced(cluster.data.api.as_ref(), NAMESPACE)
        .delete("example-trigger-engine")
        .await
        .unwrap();
    TypedApi::<Secret>::namespaced(cluster.data.api.as_ref(), NAMESPACE)
        .delete("example-cfssl-ca")
        .await
        .unwrap();

    cluster.reconcile().await.unwrap();

    let config_map = cluster.get::<ConfigMap>("example-generic-erlang-configuration").unwrap();
    assert!(config_map.data.unwrap()["vm.args"].contains("-setcookie ${ERLANG_COOKIE}"));
    // Labels set by someone else survive.
    assert_eq!(Some(&"ops".to_string()), config_map.metadata.labels.unwrap().get("team"));
    assert_eq!(None, replicas_of(&cluster, "example-pairing-api"));
    assert!(cluster.get::<Deployment>("example-trigger-engine").is_some());
    assert_eq!(Some(TEST_CA_PEM.to_string()), cluster.secret_value("example-cfssl-ca", "tls.crt"));
}

#[tokio::test]
pub async fn test_component_toggled_off_is_removed() {
    println!("Testing a component toggled off...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.11.0")).await;

    cluster.update_spec(|spec| spec.components.dashboard.generic.deploy = Some(false));
    cluster.reconcile().await.unwrap();
    assert!(cluster.get::<Deployment>("example-dashboard").is_none());
    // Companions stay until the instance itself goes away.
    assert!(cluster.get::<Service>("example-dashboard").is_some());
    assert!(cluster.get::<ConfigMap>("example-dashboard-config").is_some());
    assert_eq!(Some(AstarteClusterHealth::Green), cluster.status().health);

    cluster.reconcile().await.unwrap();
    assert!(cluster.get::<Deployment>("example-dashboard").is_none());

    cluster.update_spec(|spec| spec.components.dashboard.generic.deploy = None);
    cluster.reconcile().await.unwrap();
    assert!(cluster.get::<Deployment>("example-dashboard").is_some());
    assert!(cluster.get::<ConfigMap>("example-dashboard-config").is_some());
}

#[tokio::test]
pub async fn test_external_dependency_requires_connection() {
    println!("Testing an external Cassandra without nodes...");
    let cluster = TestCluster::new();
    let mut astarte = make_astarte("0.11.0");
    astarte.spec.cassandra.generic.deploy = Some(false);
    cluster.create_astarte(&astarte);
    let err = cluster.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::InvalidDefinition { component: "Cassandra", .. }));
    assert_eq!(RequeuePolicy::Backoff, err.requeue_policy());
    assert!(cluster.get::<StatefulSet>("example-cassandra").is_none());
    assert!(cluster.status().astarte_version.is_empty());

    cluster.update_spec(|spec| spec.cassandra.nodes = Some("cassandra.db.svc:9042".to_string()));
    cluster.converge().await.unwrap();
    assert!(cluster.get::<StatefulSet>("example-cassandra").is_none());
    assert!(cluster.get::<Service>("example-cassandra").is_none());
    let housekeeping = cluster.get::<Deployment>("example-housekeeping").unwrap();
    let env = housekeeping.spec.unwrap().template.spec.unwrap().containers[0]
        .env
        .clone()
        .unwrap();
    let nodes = env.iter().find(|var| var.name == "CASSANDRA_NODES").unwrap();
    assert_eq!(Some("cassandra.db.svc:9042".to_string()), nodes.value);
}

#[tokio::test]
pub async fn test_upgrade_refused_on_unstable_health() {
    println!("Testing an upgrade requested on a yellow cluster...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.10.0")).await;

    cluster.break_deployment("example-pairing");
    cluster.reconcile().await.unwrap();
    assert_eq!(Some(AstarteClusterHealth::Yellow), cluster.status().health);

    cluster.update_spec(|spec| spec.version = "0.11.0".to_string());
    let err = cluster.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::UnstableHealth { ref recorded_version } if recorded_version == "0.10.0"));
    assert_eq!(RequeuePolicy::Never, err.requeue_policy());
    assert_eq!(
        Some("astarte/astarte_housekeeping:0.10.0".to_string()),
        housekeeping_image(&cluster)
    );
    assert_eq!("0.10.0", cluster.status().astarte_version);
}

#[tokio::test]
pub async fn test_upgrade_to_0_11() {
    println!("Testing the upgrade from 0.10 to 0.11...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.10.0")).await;

    cluster.update_spec(|spec| spec.version = "0.11.0".to_string());
    let err = cluster.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::UpgradeInProgress { ref target, .. } if target == "0.11.0"));
    assert_eq!(RequeuePolicy::Backoff, err.requeue_policy());
    // Everything touching the database is stopped while housekeeping migrates it.
    for drained in [
        "example-data-updater-plant",
        "example-housekeeping-api",
        "example-realm-management",
        "example-realm-management-api",
        "example-pairing",
        "example-pairing-api",
        "example-trigger-engine",
        "example-appengine-api",
    ] {
        assert_eq!(Some(0), replicas_of(&cluster, drained));
    }
    assert_eq!(
        Some("astarte/astarte_housekeeping:0.11.0".to_string()),
        housekeeping_image(&cluster)
    );
    assert_eq!("0.10.0", cluster.status().astarte_version);

    // Housekeeping has not rolled out yet.
    let err = cluster.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::UpgradeInProgress { .. }));

    cluster.roll_out_deployment("example-housekeeping");
    cluster.reconcile().await.unwrap();
    assert_eq!(None, replicas_of(&cluster, "example-data-updater-plant"));
    assert_eq!(
        Some(astarte_image(&cluster.astarte().unwrap(), AstarteComponent::PairingApi)),
        image_of(&cluster, "example-pairing-api")
    );
    assert_eq!(
        Some("astarte/astarte_pairing_api:0.11.0".to_string()),
        image_of(&cluster, "example-pairing-api")
    );
    assert_eq!("0.11.0", cluster.status().astarte_version);

    cluster.mark_all_ready();
    cluster.reconcile().await.unwrap();
    assert_eq!(Some(AstarteClusterHealth::Green), cluster.status().health);
}

#[tokio::test]
pub async fn test_upgrade_to_snapshot() {
    println!("Testing an upgrade to a snapshot version...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.10.0")).await;

    cluster.update_spec(|spec| spec.version = "0.11-snapshot".to_string());
    let err = cluster.reconcile().await.unwrap_err();
    // The snapshot counts as 0.11, so the database migration runs first.
    assert!(matches!(err, Error::UpgradeInProgress { ref target, .. } if target == "0.11.0"));
    assert_eq!(Some(0), replicas_of(&cluster, "example-pairing"));

    cluster.converge().await.unwrap();
    assert_eq!("0.11-snapshot", cluster.status().astarte_version);
    assert_eq!(
        Some("astarte/astarte_housekeeping:0.11-snapshot".to_string()),
        housekeeping_image(&cluster)
    );
    assert_eq!(None, replicas_of(&cluster, "example-pairing"));
}

#[tokio::test]
pub async fn test_upgrade_to_0_11_without_housekeeping() {
    println!("Testing the upgrade from 0.10 to 0.11 with housekeeping not deployed...");
    let cluster = TestCluster::new();
    let mut astarte = make_astarte("0.10.0");
    astarte.spec.components.housekeeping.backend.deploy = Some(false);
    cluster.deploy(&astarte).await;
    assert!(cluster.get::<Deployment>("example-housekeeping").is_none());

    cluster.update_spec(|spec| spec.version = "0.11.0".to_string());
    cluster.reconcile().await.unwrap();
    // Nothing is left scaled down waiting for a migration that cannot happen.
    for component in ["example-data-updater-plant", "example-pairing", "example-appengine-api"] {
        assert_eq!(None, replicas_of(&cluster, component));
    }
    assert_eq!(
        Some("astarte/astarte_pairing:0.11.0".to_string()),
        image_of(&cluster, "example-pairing")
    );
    assert_eq!("0.11.0", cluster.status().astarte_version);
    assert!(cluster.get::<Deployment>("example-housekeeping").is_none());
}

#[tokio::test]
pub async fn test_upgrade_gate_without_recorded_health() {
    println!("Testing an upgrade requested before any health was recorded...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.10.0")).await;
    cluster
        .server
        .mutate_object::<Astarte>(NAMESPACE, NAME, |astarte| {
            if let Some(status) = astarte.status.as_mut() {
                status.health = None;
            }
        })
        .unwrap();

    // The health is then computed from the cluster as it is now.
    cluster.break_deployment("example-pairing");
    cluster.update_spec(|spec| spec.version = "0.11.0".to_string());
    let err = cluster.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::UnstableHealth { ref recorded_version } if recorded_version == "0.10.0"));
    assert_eq!(
        Some("astarte/astarte_housekeeping:0.10.0".to_string()),
        housekeeping_image(&cluster)
    );
    assert_eq!(None, cluster.status().health);

    cluster.mark_all_ready();
    let err = cluster.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::UpgradeInProgress { .. }));
    assert_eq!(
        Some("astarte/astarte_housekeeping:0.11.0".to_string()),
        housekeeping_image(&cluster)
    );
}

#[tokio::test]
pub async fn test_patch_upgrade_runs_no_migration() {
    println!("Testing an upgrade crossing no migration...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.11.0")).await;

    cluster.update_spec(|spec| spec.version = "0.11.1".to_string());
    cluster.reconcile().await.unwrap();
    assert_eq!(None, replicas_of(&cluster, "example-data-updater-plant"));
    assert_eq!(
        Some("astarte/astarte_housekeeping:0.11.1".to_string()),
        housekeeping_image(&cluster)
    );
    assert_eq!("0.11.1", cluster.status().astarte_version);
}

#[tokio::test]
pub async fn test_version_recovered_from_image() {
    println!("Testing the recovery of an unrecorded version...");
    let cluster = TestCluster::new();
    cluster
        .server
        .insert_object(NAMESPACE, &make_housekeeping_deployment("astarte/astarte_housekeeping:0.10.0"))
        .unwrap();
    cluster.create_astarte(&make_astarte("0.11.0"));

    // The recorded version differs from the requested one: this is an upgrade.
    let err = cluster.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::UpgradeInProgress { .. }));
    assert_eq!("0.10.0", cluster.status().astarte_version);

    cluster.converge().await.unwrap();
    assert_eq!("0.11.0", cluster.status().astarte_version);
}

#[tokio::test]
pub async fn test_unrecognized_image_is_retried_slowly() {
    println!("Testing the recovery from an image with a registry port...");
    let cluster = TestCluster::new();
    cluster
        .server
        .insert_object(
            NAMESPACE,
            &make_housekeeping_deployment("registry.example.com:5000/astarte/astarte_housekeeping:0.10.0"),
        )
        .unwrap();
    cluster.create_astarte(&make_astarte("0.11.0"));
    let err = cluster.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::UnrecognizedImage(_)));
    assert_eq!(RequeuePolicy::After(SLOW_REQUEUE_DELAY), err.requeue_policy());
    assert!(cluster.status().astarte_version.is_empty());
}

#[tokio::test]
pub async fn test_snapshot_version_never_upgrades() {
    println!("Testing a recorded snapshot version...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.10.0")).await;
    cluster
        .server
        .mutate_object::<Astarte>(NAMESPACE, NAME, |astarte| {
            if let Some(status) = astarte.status.as_mut() {
                status.astarte_version = SNAPSHOT_VERSION.to_string();
            }
            astarte.spec.version = "0.11.0".to_string();
        })
        .unwrap();
    cluster.reconcile().await.unwrap();
    assert_eq!(None, replicas_of(&cluster, "example-data-updater-plant"));
    assert_eq!("0.11.0", cluster.status().astarte_version);
}

#[tokio::test]
pub async fn test_health_tiers() {
    println!("Testing the health of a degrading cluster...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.11.0")).await;

    cluster.break_deployment("example-pairing");
    cluster.reconcile().await.unwrap();
    assert_eq!(Some(AstarteClusterHealth::Yellow), cluster.status().health);

    cluster.break_deployment("example-trigger-engine");
    cluster.reconcile().await.unwrap();
    assert_eq!(Some(AstarteClusterHealth::Red), cluster.status().health);

    cluster.mark_all_ready();
    cluster.reconcile().await.unwrap();
    assert_eq!(Some(AstarteClusterHealth::Green), cluster.status().health);
}

#[tokio::test]
pub async fn test_health_kept_when_listing_fails() {
    println!("Testing the health when deployments cannot be listed...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.11.0")).await;
    cluster.break_deployment("example-pairing");
    cluster
        .server
        .inject_error("List", "Deployment", None, APIError::InternalError);
    cluster.reconcile().await.unwrap();
    assert_eq!(Some(AstarteClusterHealth::Green), cluster.status().health);
}

#[tokio::test]
pub async fn test_housekeeping_keys() {
    println!("Testing the housekeeping key pair lifecycle...");
    let cluster = TestCluster::new();
    let private_name = housekeeping_private_key_secret_name(&make_astarte("0.11.0"));
    let public_name = housekeeping_public_key_secret_name(&make_astarte("0.11.0"));
    cluster
        .server
        .insert_object(
            NAMESPACE,
            &Secret {
                metadata: ObjectMeta {
                    name: Some(private_name.clone()),
                    ..ObjectMeta::default()
                },
                string_data: Some(BTreeMap::from([(
                    HOUSEKEEPING_PRIVATE_KEY.to_string(),
                    "stale".to_string(),
                )])),
                ..Secret::default()
            },
        )
        .unwrap();

    // The orphaned private half is replaced by a fresh pair.
    cluster.deploy(&make_astarte("0.11.0")).await;
    assert_eq!(
        Some("private-1".to_string()),
        cluster.secret_value(&private_name, HOUSEKEEPING_PRIVATE_KEY)
    );
    assert_eq!(
        Some("public-1".to_string()),
        cluster.secret_value(&public_name, HOUSEKEEPING_PUBLIC_KEY)
    );

    cluster.reconcile().await.unwrap();
    assert_eq!(
        Some("private-1".to_string()),
        cluster.secret_value(&private_name, HOUSEKEEPING_PRIVATE_KEY)
    );

    TypedApi::<Secret>::namespaced(cluster.data.api.as_ref(), NAMESPACE)
        .delete(&public_name)
        .await
        .unwrap();
    cluster.reconcile().await.unwrap();
    assert_eq!(
        Some("private-2".to_string()),
        cluster.secret_value(&private_name, HOUSEKEEPING_PRIVATE_KEY)
    );
    assert_eq!(
        Some("public-2".to_string()),
        cluster.secret_value(&public_name, HOUSEKEEPING_PUBLIC_KEY)
    );
}

#[tokio::test]
pub async fn test_deletion_cleans_up() {
    println!("Testing the deletion of an instance...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.11.0")).await;
    for claim in [
        "example-cassandra-data-example-cassandra-0",
        "example-rabbitmq-data-example-rabbitmq-0",
        "example-vernemq-data-example-vernemq-1",
        "unrelated-data",
    ] {
        cluster.server.insert_object(NAMESPACE, &make_claim(claim)).unwrap();
    }

    TypedApi::<Astarte>::namespaced(cluster.data.api.as_ref(), NAMESPACE)
        .delete(NAME)
        .await
        .unwrap();
    // The finalizer holds the instance until the cleanup ran.
    assert!(cluster.astarte().unwrap().metadata.deletion_timestamp.is_some());

    let action = cluster.reconcile().await.unwrap();
    assert_eq!(Action::await_change(), action);
    assert!(cluster.astarte().is_none());
    // Owned objects are garbage collected; the CA secret and the claims are removed
    // explicitly; the unrelated claim stays.
    assert_eq!(
        vec![KubeObjectRef::new("PersistentVolumeClaim", NAMESPACE, "unrelated-data")],
        cluster.server.object_refs()
    );
}

#[tokio::test]
pub async fn test_deletion_tolerates_secret_cleanup_failure() {
    println!("Testing the deletion when the CA secret cannot be removed...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.11.0")).await;
    cluster
        .server
        .inject_error("Delete", "Secret", Some("example-cfssl-ca"), APIError::InternalError);

    TypedApi::<Astarte>::namespaced(cluster.data.api.as_ref(), NAMESPACE)
        .delete(NAME)
        .await
        .unwrap();
    cluster.reconcile().await.unwrap();
    assert!(cluster.astarte().is_none());
    assert!(cluster.get::<Secret>("example-cfssl-ca").is_some());
}

#[tokio::test]
pub async fn test_deletion_blocked_by_claim_listing_failure() {
    println!("Testing the deletion when claims cannot be listed...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.11.0")).await;
    cluster.server.insert_object(NAMESPACE, &make_claim("example-cfssl-data-example-cfssl-0")).unwrap();
    cluster
        .server
        .inject_error("List", "PersistentVolumeClaim", None, APIError::InternalError);

    TypedApi::<Astarte>::namespaced(cluster.data.api.as_ref(), NAMESPACE)
        .delete(NAME)
        .await
        .unwrap();
    let err = cluster.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::KubeApi(_)));
    assert_eq!(RequeuePolicy::Backoff, err.requeue_policy());
    let astarte = cluster.astarte().unwrap();
    assert_eq!(Some(vec![ASTARTE_FINALIZER.to_string()]), astarte.metadata.finalizers);

    cluster.server.clear_injected_errors();
    cluster.reconcile().await.unwrap();
    assert!(cluster.astarte().is_none());
    assert!(cluster.get::<PersistentVolumeClaim>("example-cfssl-data-example-cfssl-0").is_none());
}

#[tokio::test]
pub async fn test_deleted_instance_with_invalid_version_is_kept() {
    println!("Testing the deletion of an instance with an invalid version...");
    let cluster = TestCluster::new();
    cluster.deploy(&make_astarte("0.11.0")).await;
    cluster.update_spec(|spec| spec.version = "0.9.0".to_string());
    TypedApi::<Astarte>::namespaced(cluster.data.api.as_ref(), NAMESPACE)
        .delete(NAME)
        .await
        .unwrap();
    // The version gate comes before the deletion branch.
    let err = cluster.reconcile().await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedVersion { .. }));
    assert!(cluster.astarte().is_some());
}

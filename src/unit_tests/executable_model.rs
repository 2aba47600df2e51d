// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::astarte_controller::trusted::spec_types::*;
use crate::executable_model::api_server::ExecutableApiServer;
use crate::kubernetes_api_objects::{error::APIError, typed_api::TypedApi};
use crate::unit_tests::fixtures::*;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::Resource;
use std::collections::BTreeMap;

// Tests for the in-memory API server

fn make_config_map(name: &str, value: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([("key".to_string(), value.to_string())])),
        ..ConfigMap::default()
    }
}

#[tokio::test]
pub async fn test_create_and_get() {
    println!("Testing create and get...");
    let server = ExecutableApiServer::new();
    let api = TypedApi::<ConfigMap>::namespaced(&server, NAMESPACE);
    let created = api.create(&make_config_map("cm", "a")).await.unwrap();
    assert_eq!(Some(NAMESPACE.to_string()), created.metadata.namespace);
    assert_eq!(Some(1), created.metadata.generation);
    assert!(created.metadata.uid.is_some());
    assert!(created.metadata.resource_version.is_some());
    assert_eq!(created, api.get("cm").await.unwrap());

    let err = api.create(&make_config_map("cm", "b")).await.unwrap_err();
    assert!(err.is_object_already_exists());
    let err = api.get("other").await.unwrap_err();
    assert!(err.is_object_not_found());
    assert_eq!(None, api.get_opt("other").await.unwrap());
}

#[tokio::test]
pub async fn test_update_with_stale_resource_version_conflicts() {
    println!("Testing optimistic concurrency...");
    let server = ExecutableApiServer::new();
    let api = TypedApi::<ConfigMap>::namespaced(&server, NAMESPACE);
    let created = api.create(&make_config_map("cm", "a")).await.unwrap();

    let mut first = created.clone();
    first.data = Some(BTreeMap::from([("key".to_string(), "b".to_string())]));
    let updated = api.replace(&first).await.unwrap();
    assert_ne!(created.metadata.resource_version, updated.metadata.resource_version);

    let mut second = created.clone();
    second.data = Some(BTreeMap::from([("key".to_string(), "c".to_string())]));
    let err = api.replace(&second).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(updated, api.get("cm").await.unwrap());
}

#[tokio::test]
pub async fn test_no_op_update_keeps_resource_version() {
    println!("Testing an update that changes nothing...");
    let server = ExecutableApiServer::new();
    let api = TypedApi::<ConfigMap>::namespaced(&server, NAMESPACE);
    let created = api.create(&make_config_map("cm", "a")).await.unwrap();
    let counter = server.resource_version_counter();
    let updated = api.replace(&created).await.unwrap();
    assert_eq!(created.metadata.resource_version, updated.metadata.resource_version);
    assert_eq!(counter, server.resource_version_counter());
}

#[tokio::test]
pub async fn test_generation_tracks_spec_changes() {
    println!("Testing generations...");
    let server = ExecutableApiServer::new();
    let api = TypedApi::<Deployment>::namespaced(&server, NAMESPACE);
    let deployment = Deployment {
        metadata: ObjectMeta {
            name: Some("d".to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    };
    let created = api.create(&deployment).await.unwrap();
    assert_eq!(Some(1), created.metadata.generation);

    let mut labelled = created.clone();
    labelled.metadata.labels = Some(BTreeMap::from([("app".to_string(), "d".to_string())]));
    let labelled = api.replace(&labelled).await.unwrap();
    assert_eq!(Some(1), labelled.metadata.generation);

    let mut scaled = labelled.clone();
    if let Some(spec) = scaled.spec.as_mut() {
        spec.replicas = Some(3);
    }
    let scaled = api.replace(&scaled).await.unwrap();
    assert_eq!(Some(2), scaled.metadata.generation);
}

#[tokio::test]
pub async fn test_status_only_through_status_subresource() {
    println!("Testing status writes...");
    let server = ExecutableApiServer::new();
    let api = TypedApi::<Deployment>::namespaced(&server, NAMESPACE);
    let mut deployment = Deployment {
        metadata: ObjectMeta {
            name: Some("d".to_string()),
            ..ObjectMeta::default()
        },
        status: Some(DeploymentStatus {
            ready_replicas: Some(3),
            ..DeploymentStatus::default()
        }),
        ..Deployment::default()
    };
    let created = api.create(&deployment).await.unwrap();
    assert_eq!(None, created.status);

    deployment = created.clone();
    deployment.status = Some(DeploymentStatus {
        ready_replicas: Some(3),
        ..DeploymentStatus::default()
    });
    let updated = api.replace(&deployment).await.unwrap();
    assert_eq!(None, updated.status);

    let updated = api.replace_status(&deployment).await.unwrap();
    assert_eq!(Some(3), updated.status.unwrap().ready_replicas);
}

#[tokio::test]
pub async fn test_custom_resource_update_requires_resource_version() {
    println!("Testing an unconditional update of an Astarte...");
    let server = ExecutableApiServer::new();
    let astarte = server.insert_object(NAMESPACE, &make_astarte("0.11.0")).unwrap();
    let api = TypedApi::<Astarte>::namespaced(&server, NAMESPACE);
    let mut unconditional = astarte.clone();
    unconditional.metadata.resource_version = None;
    unconditional.spec.version = "0.11.1".to_string();
    let err = api.replace(&unconditional).await.unwrap_err();
    assert_eq!(APIError::Invalid, err.error);
}

#[tokio::test]
pub async fn test_finalizers_hold_deletion() {
    println!("Testing deletion with finalizers...");
    let server = ExecutableApiServer::new();
    let api = TypedApi::<ConfigMap>::namespaced(&server, NAMESPACE);
    let mut config_map = make_config_map("cm", "a");
    config_map.metadata.finalizers = Some(vec!["example.com/hold".to_string()]);
    api.create(&config_map).await.unwrap();

    api.delete("cm").await.unwrap();
    let held = api.get("cm").await.unwrap();
    assert!(held.metadata.deletion_timestamp.is_some());

    let mut more = held.clone();
    more.metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push("example.com/other".to_string());
    assert_eq!(APIError::Forbidden, api.replace(&more).await.unwrap_err().error);

    let mut released = held.clone();
    released.metadata.finalizers = Some(Vec::new());
    api.replace(&released).await.unwrap();
    assert!(api.get_opt("cm").await.unwrap().is_none());
}

#[tokio::test]
pub async fn test_owner_deletion_collects_dependents() {
    println!("Testing garbage collection...");
    let server = ExecutableApiServer::new();
    let astarte = server.insert_object(NAMESPACE, &make_astarte("0.11.0")).unwrap();
    let api = TypedApi::<ConfigMap>::namespaced(&server, NAMESPACE);
    let mut owned = make_config_map("owned", "a");
    owned.metadata.owner_references = Some(vec![astarte.controller_owner_ref(&()).unwrap()]);
    api.create(&owned).await.unwrap();
    api.create(&make_config_map("free", "a")).await.unwrap();

    TypedApi::<Astarte>::namespaced(&server, NAMESPACE).delete(NAME).await.unwrap();
    assert!(api.get_opt("owned").await.unwrap().is_none());
    assert!(api.get_opt("free").await.unwrap().is_some());
}

#[tokio::test]
pub async fn test_two_controller_owners_are_invalid() {
    println!("Testing an object with two controllers...");
    let server = ExecutableApiServer::new();
    let astarte = server.insert_object(NAMESPACE, &make_astarte("0.11.0")).unwrap();
    let owner_ref = astarte.controller_owner_ref(&()).unwrap();
    let mut config_map = make_config_map("cm", "a");
    config_map.metadata.owner_references = Some(vec![owner_ref.clone(), owner_ref]);
    let err = TypedApi::<ConfigMap>::namespaced(&server, NAMESPACE)
        .create(&config_map)
        .await
        .unwrap_err();
    assert_eq!(APIError::Invalid, err.error);
}

#[tokio::test]
pub async fn test_list_by_label() {
    println!("Testing list with a label selector...");
    let server = ExecutableApiServer::new();
    let api = TypedApi::<ConfigMap>::namespaced(&server, NAMESPACE);
    let mut labelled = make_config_map("labelled", "a");
    labelled.metadata.labels = Some(BTreeMap::from([("component".to_string(), "astarte".to_string())]));
    api.create(&labelled).await.unwrap();
    api.create(&make_config_map("plain", "a")).await.unwrap();
    TypedApi::<ConfigMap>::namespaced(&server, "elsewhere")
        .create(&labelled)
        .await
        .unwrap();

    let all = api.list(None).await.unwrap();
    assert_eq!(2, all.len());
    let selected = api.list(Some("component=astarte")).await.unwrap();
    assert_eq!(1, selected.len());
    assert_eq!(Some("labelled".to_string()), selected[0].metadata.name);
    assert!(api.list(Some("component!=astarte")).await.is_err());
}

//! Integration tests for the Kubernetes object store
//!
//! These drive [`KubeObjectStore`] against a real API server to check the
//! contracts the controller relies on.

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::{Api, PostParams};

use redis_ha::client::{CreateOutcome, KubeObjectStore, ObjectStore, PatchOutcome};
use redis_ha::crd::{Phase, RedisHA, RedisHAStatus};
use redis_ha::workload::{build_pod_disruption_budget, build_service, build_statefulset};
use redis_ha::FINALIZER;

use super::helpers::{cleanup_redis, ensure_test_cluster, sample_redis, TEST_NAMESPACE};

/// Create the RedisHA so children can point their ownerReference at it
async fn create_owner(client: &kube::Client, name: &str) -> RedisHA {
    cleanup_redis(client, name).await;
    let api: Api<RedisHA> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    api.create(&PostParams::default(), &sample_redis(name))
        .await
        .expect("failed to create RedisHA")
}

/// Story: Applying the workload twice yields one object and no error
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_workload_create_is_idempotent() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let store = KubeObjectStore::new(client.clone());
    let redis = create_owner(&client, "store-idem").await;

    let sts = build_statefulset(&redis, None).unwrap();
    assert_eq!(
        store.apply_statefulset(&sts).await.unwrap(),
        PatchOutcome::Created
    );
    assert_eq!(
        store.apply_statefulset(&sts).await.unwrap(),
        PatchOutcome::Unchanged
    );
    assert!(store
        .statefulset_exists(TEST_NAMESPACE, "store-idem")
        .await
        .unwrap());

    let svc = build_service(&redis).unwrap();
    assert!(!store.service_exists(TEST_NAMESPACE, "store-idem").await.unwrap());
    store.create_service(&svc).await.unwrap();
    assert_eq!(
        store.create_service(&svc).await.unwrap(),
        CreateOutcome::AlreadyExists
    );

    cleanup_redis(&client, "store-idem").await;
}

/// Story: An image bump is patched onto the stored StatefulSet
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_statefulset_drift_is_patched() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let store = KubeObjectStore::new(client.clone());
    let redis = create_owner(&client, "store-drift").await;

    store
        .apply_statefulset(&build_statefulset(&redis, None).unwrap())
        .await
        .unwrap();

    let mut bumped = redis.clone();
    bumped.spec.kubernetes_config.image = "redis-etcd:6.2.7".to_string();
    assert_eq!(
        store
            .apply_statefulset(&build_statefulset(&bumped, None).unwrap())
            .await
            .unwrap(),
        PatchOutcome::Applied
    );

    let api: Api<StatefulSet> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let stored = api.get("store-drift").await.unwrap();
    let image = stored.spec.unwrap().template.spec.unwrap().containers[0]
        .image
        .clone();
    assert_eq!(image.as_deref(), Some("redis-etcd:6.2.7"));

    cleanup_redis(&client, "store-drift").await;
}

/// Story: Re-applying an unchanged budget makes no write
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_budget_apply_detects_no_change() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let store = KubeObjectStore::new(client.clone());
    let redis = create_owner(&client, "store-pdb").await;

    let pdb = build_pod_disruption_budget(&redis).unwrap();
    assert_eq!(
        store.apply_pod_disruption_budget(&pdb).await.unwrap(),
        PatchOutcome::Created
    );
    assert_eq!(
        store.apply_pod_disruption_budget(&pdb).await.unwrap(),
        PatchOutcome::Unchanged
    );

    let mut relabeled = pdb.clone();
    relabeled
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert("team".to_string(), "payments".to_string());
    assert_eq!(
        store.apply_pod_disruption_budget(&relabeled).await.unwrap(),
        PatchOutcome::Applied
    );

    cleanup_redis(&client, "store-pdb").await;
}

/// Story: A status write against a stale version is rejected as a conflict
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_stale_status_write_conflicts() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let store = KubeObjectStore::new(client.clone());
    let redis = create_owner(&client, "store-fence").await;
    let observed = redis.metadata.resource_version.clone();

    store
        .patch_status(
            TEST_NAMESPACE,
            "store-fence",
            observed.clone(),
            &RedisHAStatus::with_phase(Phase::CreateWorkload),
        )
        .await
        .expect("first write should succeed");

    let err = store
        .patch_status(
            TEST_NAMESPACE,
            "store-fence",
            observed,
            &RedisHAStatus::with_phase(Phase::CheckPods),
        )
        .await
        .expect_err("second write reuses a stale version");
    assert!(err.is_conflict());

    cleanup_redis(&client, "store-fence").await;
}

/// Story: The finalizer is added once and removed cleanly
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_finalizer_round_trip() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let store = KubeObjectStore::new(client.clone());
    create_owner(&client, "store-fin").await;
    let api: Api<RedisHA> = Api::namespaced(client.clone(), TEST_NAMESPACE);

    store.add_finalizer(TEST_NAMESPACE, "store-fin").await.unwrap();
    store.add_finalizer(TEST_NAMESPACE, "store-fin").await.unwrap();
    let finalizers = api.get("store-fin").await.unwrap().metadata.finalizers.unwrap();
    assert_eq!(finalizers, vec![FINALIZER.to_string()]);

    store
        .remove_finalizer(TEST_NAMESPACE, "store-fin")
        .await
        .unwrap();
    let finalizers = api
        .get("store-fin")
        .await
        .unwrap()
        .metadata
        .finalizers
        .unwrap_or_default();
    assert!(finalizers.is_empty());

    // Removing from a vanished object is not an error
    cleanup_redis(&client, "store-fin").await;
    store
        .remove_finalizer(TEST_NAMESPACE, "store-fin")
        .await
        .unwrap();
}

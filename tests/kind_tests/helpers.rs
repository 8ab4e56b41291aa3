//! Test helpers for integration tests
//!
//! Provides utilities for managing the kind cluster and test namespaces.

use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Config, CustomResourceExt};
use tokio::sync::OnceCell;
use tokio::time::sleep;

use redis_ha::crd::{KubernetesConfig, RedisHA, RedisHASpec};
use redis_ha::FIELD_MANAGER;

/// Name of the kind cluster used for integration tests
pub const TEST_CLUSTER_NAME: &str = "redis-ha-integration-test";

/// Namespace every integration test works in
pub const TEST_NAMESPACE: &str = "redis-ha-it";

/// Global lock to ensure cluster is created only once
static CLUSTER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Track if CRD and namespace have been installed (async-safe)
static CRD_INSTALLED: OnceCell<Result<(), String>> = OnceCell::const_new();

/// Check if a kind cluster with the given name exists
pub fn kind_cluster_exists(name: &str) -> bool {
    let output = Command::new("kind")
        .args(["get", "clusters"])
        .output()
        .expect("failed to run kind");

    let clusters = String::from_utf8_lossy(&output.stdout);
    clusters.lines().any(|line| line.trim() == name)
}

/// Create a kind cluster for testing
pub fn create_kind_cluster(name: &str) -> Result<(), String> {
    if kind_cluster_exists(name) {
        println!("Kind cluster '{name}' already exists, reusing it");
        return Ok(());
    }

    println!("Creating kind cluster '{name}'...");
    let output = Command::new("kind")
        .args(["create", "cluster", "--name", name, "--wait", "60s"])
        .output()
        .map_err(|e| format!("failed to run kind: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "failed to create kind cluster: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    Ok(())
}

/// Server-side apply the RedisHA CRD, the same way the operator does at startup
pub async fn install_crd(client: &Client) -> Result<(), kube::Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    crds.patch(
        "redishas.apps.operator-redis-ha.org",
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&RedisHA::crd()),
    )
    .await?;

    // Wait for CRD to be established
    sleep(Duration::from_secs(2)).await;
    Ok(())
}

/// Create the test namespace unless it exists
pub async fn ensure_namespace(client: &Client, name: &str) -> Result<(), kube::Error> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(e),
    }
}

/// Create a Kubernetes client connected to the test cluster
pub async fn create_test_client() -> Result<Client, String> {
    let context_name = format!("kind-{TEST_CLUSTER_NAME}");

    let config = Config::from_kubeconfig(&kube::config::KubeConfigOptions {
        context: Some(context_name),
        ..Default::default()
    })
    .await
    .map_err(|e| format!("failed to load kubeconfig: {e}"))?;

    Client::try_from(config).map_err(|e| format!("failed to create client: {e}"))
}

/// Ensure the test cluster is ready (thread-safe, cluster created once)
///
/// Returns a fresh Client for each call - clients should not be shared across test threads.
pub async fn ensure_test_cluster() -> Result<Client, String> {
    let cluster_result = CLUSTER_INIT.get_or_init(|| create_kind_cluster(TEST_CLUSTER_NAME));
    cluster_result.clone()?;

    let client = create_test_client().await?;

    let crd_result = CRD_INSTALLED
        .get_or_init(|| async {
            let client = create_test_client().await?;
            install_crd(&client)
                .await
                .map_err(|e| format!("failed to install CRD: {e}"))?;
            ensure_namespace(&client, TEST_NAMESPACE)
                .await
                .map_err(|e| format!("failed to create namespace: {e}"))
        })
        .await;
    crd_result.clone()?;

    Ok(client)
}

/// A minimal RedisHA in the test namespace
pub fn sample_redis(name: &str) -> RedisHA {
    RedisHA {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: RedisHASpec {
            kubernetes_config: KubernetesConfig {
                image: "redis-etcd:6.2.6".to_string(),
                image_pull_policy: Some("IfNotPresent".to_string()),
                resources: None,
            },
            ..Default::default()
        },
        status: None,
    }
}

/// Delete a RedisHA, stripping finalizers so it does not linger
pub async fn cleanup_redis(client: &Client, name: &str) {
    let api: Api<RedisHA> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let strip = serde_json::json!({ "metadata": { "finalizers": null } });
    let _ = api
        .patch(name, &PatchParams::default(), &Patch::Merge(&strip))
        .await;
    let _ = api.delete(name, &Default::default()).await;
    sleep(Duration::from_millis(500)).await;
}

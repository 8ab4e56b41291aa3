//! Redis HA Operator - primary/replica Redis pairs on Kubernetes

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use redis_ha::config::OperatorConfig;
use redis_ha::controller::{error_policy, reconcile, Context};
use redis_ha::credentials::EtcdCredentials;
use redis_ha::crd::RedisHA;
use redis_ha::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use redis_ha::{DEFAULT_CLUSTER_DOMAIN, FIELD_MANAGER};

/// Server-side watch timeout in seconds
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Redis HA Operator - keeps a primary/replica Redis pair running per RedisHA
#[derive(Parser, Debug)]
#[command(name = "redis-ha-operator", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// DNS suffix of published client addresses
    #[arg(long, env = "CLUSTER_DOMAIN", default_value = DEFAULT_CLUSTER_DOMAIN, global = true)]
    cluster_domain: String,

    /// Endpoints object (namespace/name) listing the etcd members
    #[arg(
        long,
        env = "ETCD_ENDPOINTS",
        default_value = "kube-system/coc-kube-etcd",
        global = true
    )]
    etcd_endpoints: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches RedisHA resources and the StatefulSets, Services and
    /// PodDisruptionBudgets they own.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&RedisHA::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(&cli).await,
    }
}

/// Ensure the RedisHA CRD is installed
///
/// The operator installs its own CRD on startup using server-side apply, so
/// the schema always matches the running binary.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing RedisHA CRD...");
    crds.patch(
        "redishas.apps.operator-redis-ha.org",
        &params,
        &Patch::Apply(&RedisHA::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install RedisHA CRD: {}", e))?;

    Ok(())
}

/// Run the RedisHA controller until a shutdown signal arrives
async fn run_controller(cli: &Cli) -> anyhow::Result<()> {
    // Credentials and config are validated before touching the cluster
    let credentials = EtcdCredentials::from_env()?;
    let config = OperatorConfig::new(&cli.cluster_domain, Some(&cli.etcd_endpoints))?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    tracing::info!(
        cluster_domain = %config.cluster_domain,
        etcd_endpoints = ?config.etcd_endpoints.as_ref().map(ToString::to_string),
        "Starting RedisHA controller"
    );

    let ctx = Arc::new(
        Context::builder(client.clone(), Arc::new(credentials))
            .config(config)
            .build(),
    );

    let redishas: Api<RedisHA> = Api::all(client.clone());
    let watcher_config = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    Controller::new(redishas, watcher_config.clone())
        .owns(Api::<StatefulSet>::all(client.clone()), watcher_config.clone())
        .owns(Api::<Service>::all(client.clone()), watcher_config.clone())
        .owns(Api::<PodDisruptionBudget>::all(client), watcher_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "RedisHA reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "RedisHA reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("RedisHA controller stopped");
    Ok(())
}

//! RedisHA controller implementation
//!
//! Each invocation reads the persisted phase, performs that phase's single
//! step and either persists the next status (requeue immediately) or leaves
//! the status alone and asks to be called again later. Failures are never
//! fatal: the phase stays put and the step is retried after
//! [`EVENT_INTERVAL`].

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::client::{KubeObjectStore, ObjectStore, PodExec, RemoteExec};
use crate::config::OperatorConfig;
use crate::credentials::EtcdCredentials;
use crate::crd::{Phase, RedisHA, RedisHAStatus};
use crate::workload::{
    build_pod_disruption_budget, build_service, build_statefulset, member_name, PRIMARY_ORDINAL,
    REPLICA_ORDINAL,
};
use crate::{Error, EVENT_INTERVAL, FINALIZER, NORMAL_INTERVAL, REDIS_PORT, REPLICA_COUNT};

/// Controller context containing shared state and clients
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client, Arc::new(credentials))
///     .config(config)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes object access (trait object for testability)
    pub store: Arc<dyn ObjectStore>,
    /// Command execution inside Redis pods
    pub exec: Arc<dyn RemoteExec>,
    /// etcd client credentials pushed into every member
    pub credentials: Arc<EtcdCredentials>,
    /// Settings shared by every reconcile
    pub config: OperatorConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, credentials: Arc<EtcdCredentials>) -> ContextBuilder {
        ContextBuilder::new(client, credentials)
    }

    /// Create a context for testing with mock collaborators
    #[cfg(test)]
    pub fn for_testing(
        store: Arc<dyn ObjectStore>,
        exec: Arc<dyn RemoteExec>,
        credentials: EtcdCredentials,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store,
            exec,
            credentials: Arc::new(credentials),
            config,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    credentials: Arc<EtcdCredentials>,
    config: OperatorConfig,
    store: Option<Arc<dyn ObjectStore>>,
    exec: Option<Arc<dyn RemoteExec>>,
}

impl ContextBuilder {
    fn new(client: Client, credentials: Arc<EtcdCredentials>) -> Self {
        Self {
            client,
            credentials,
            config: OperatorConfig::default(),
            store: None,
            exec: None,
        }
    }

    /// Set the runtime configuration
    pub fn config(mut self, config: OperatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the object store
    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the pod exec client
    pub fn remote_exec(mut self, exec: Arc<dyn RemoteExec>) -> Self {
        self.exec = Some(exec);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(KubeObjectStore::new(self.client.clone()))),
            exec: self
                .exec
                .unwrap_or_else(|| Arc::new(PodExec::new(self.client.clone()))),
            credentials: self.credentials,
            config: self.config,
        }
    }
}

/// What a phase step decided
#[derive(Debug, PartialEq)]
enum Step {
    /// Persist this status, fenced on the observed resourceVersion
    Advance(RedisHAStatus),
    /// Persist this status unfenced; the object may already be gone
    Release(RedisHAStatus),
}

/// Identity of the resource being reconciled
struct Target<'a> {
    redis: &'a RedisHA,
    name: String,
    namespace: String,
}

impl Target<'_> {
    fn member(&self, ordinal: u32) -> String {
        member_name(&self.name, ordinal)
    }
}

fn has_finalizer(redis: &RedisHA) -> bool {
    redis.finalizers().iter().any(|f| f == FINALIZER)
}

fn is_deleting(redis: &RedisHA) -> bool {
    redis.metadata.deletion_timestamp.is_some()
}

/// Address the replica is told to follow; IPv6 literals are bracketed
pub fn primary_host(ip: &str) -> String {
    if ip.contains(':') && !ip.starts_with('[') {
        format!("[{ip}]")
    } else {
        ip.to_string()
    }
}

/// Command making the replica follow the primary at `ip`
pub fn replication_command(ip: &str) -> Vec<String> {
    let port = REDIS_PORT.to_string();
    vec![
        "redis-cli".to_string(),
        "-p".to_string(),
        port.clone(),
        "slaveof".to_string(),
        primary_host(ip),
        port,
    ]
}

/// Reconcile a RedisHA resource
///
/// Adds the finalizer to live objects, redirects objects pending deletion
/// into the delete path, then runs the step for the persisted phase.
#[instrument(
    skip(redis, ctx),
    fields(redis_ha = %redis.name_any(), namespace = %redis.namespace().unwrap_or_default())
)]
pub async fn reconcile(redis: Arc<RedisHA>, ctx: Arc<Context>) -> Result<Action, Error> {
    let target = Target {
        redis: &redis,
        name: redis.name_any(),
        namespace: redis
            .namespace()
            .ok_or_else(|| Error::precondition("RedisHA must be namespaced"))?,
    };
    let deleting = is_deleting(&redis);

    if !deleting && !has_finalizer(&redis) {
        ctx.store
            .add_finalizer(&target.namespace, &target.name)
            .await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    let status = redis.status.clone().unwrap_or_default();
    let phase = status.phase;
    debug!(%phase, deleting, "reconciling");

    let step = match phase {
        Phase::Normal => return Ok(normal(&target, &ctx, status, deleting).await),
        Phase::Unrecognized(code) => {
            if deleting {
                Ok(Step::Advance(status.phase(Phase::CheckDelete)))
            } else {
                warn!(code, "unrecognized phase code, leaving resource untouched");
                return Ok(Action::requeue(NORMAL_INTERVAL));
            }
        }
        Phase::CheckDelete => Ok(check_delete(status, deleting)),
        Phase::ProcessDelete => process_delete(&target, &ctx, status).await,
        _ if deleting => {
            info!(%phase, "deletion requested, leaving the create path");
            Ok(Step::Advance(status.phase(Phase::CheckDelete)))
        }
        Phase::Start | Phase::CheckWorkload => check_workload(&target, &ctx, status).await,
        Phase::CreateWorkload => create_workload(&target, &ctx, status).await,
        Phase::CheckPods => check_pods(&target, &ctx, status).await,
        Phase::CheckService => check_service(&target, &ctx, status).await,
        Phase::CreateService => create_service(&target, &ctx, status).await,
        Phase::SetCredential => set_credential(&target, &ctx, status).await,
        Phase::CheckReplication | Phase::FixServerProcess | Phase::ForceRedoPod => {
            Ok(check_replication(status))
        }
        Phase::CreateReplication => create_replication(&target, &ctx, status).await,
    };

    match step {
        Ok(step) => Ok(persist(&target, &ctx, phase, step).await),
        Err(e) => {
            warn!(%phase, error = %e, "step failed, retrying");
            Ok(Action::requeue(EVENT_INTERVAL))
        }
    }
}

/// Error policy for the controller
///
/// Only failures outside a phase step reach this point. They get the same
/// flat retry as a failed step.
pub fn error_policy(redis: Arc<RedisHA>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        redis_ha = %redis.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(EVENT_INTERVAL)
}

async fn persist(target: &Target<'_>, ctx: &Context, from: Phase, step: Step) -> Action {
    let (status, fenced) = match step {
        Step::Advance(status) => (status, true),
        Step::Release(status) => (status, false),
    };
    let version = if fenced {
        target.redis.resource_version()
    } else {
        None
    };

    match ctx
        .store
        .patch_status(&target.namespace, &target.name, version, &status)
        .await
    {
        Ok(()) => {
            info!(from = %from, to = %status.phase, "phase transition");
            Action::requeue(Duration::ZERO)
        }
        Err(e) if !fenced && e.is_not_found() => {
            debug!("resource removed after finalizer release");
            Action::await_change()
        }
        Err(e) if e.is_conflict() => {
            debug!(
                from = %from,
                to = %status.phase,
                error = %e,
                "resource changed since it was read"
            );
            Action::requeue(EVENT_INTERVAL)
        }
        Err(e) => {
            warn!(from = %from, to = %status.phase, error = %e, "failed to persist status");
            Action::requeue(EVENT_INTERVAL)
        }
    }
}

async fn check_workload(
    target: &Target<'_>,
    ctx: &Context,
    status: RedisHAStatus,
) -> Result<Step, Error> {
    let exists = ctx
        .store
        .statefulset_exists(&target.namespace, &target.name)
        .await?;

    let next = if exists {
        Phase::CheckPods
    } else {
        Phase::CreateWorkload
    };
    Ok(Step::Advance(status.phase(next)))
}

/// Resolve the etcd member list for the pod environment
///
/// A lookup failure is not fatal; the members start without `ETCD_ADDR`.
async fn resolve_etcd_addr(ctx: &Context) -> Option<String> {
    let key = ctx.config.etcd_endpoints.as_ref()?;
    match ctx.store.etcd_endpoints(&key.namespace, &key.name).await {
        Ok(addr) => Some(addr),
        Err(e) => {
            warn!(endpoints = %key, error = %e, "could not resolve etcd endpoints");
            None
        }
    }
}

async fn create_workload(
    target: &Target<'_>,
    ctx: &Context,
    status: RedisHAStatus,
) -> Result<Step, Error> {
    let etcd_addr = resolve_etcd_addr(ctx).await;
    let statefulset = build_statefulset(target.redis, etcd_addr.as_deref())?;
    let outcome = ctx.store.apply_statefulset(&statefulset).await?;
    debug!(?outcome, "statefulset apply");

    let pdb = build_pod_disruption_budget(target.redis)?;
    ctx.store.apply_pod_disruption_budget(&pdb).await?;

    Ok(Step::Advance(status.phase(Phase::CheckPods)))
}

async fn check_pods(
    target: &Target<'_>,
    ctx: &Context,
    status: RedisHAStatus,
) -> Result<Step, Error> {
    let replicas = ctx
        .store
        .running_replicas(&target.namespace, &target.name)
        .await?;

    match replicas {
        Some(count) if count == REPLICA_COUNT => Ok(Step::Advance(status.phase(Phase::CheckService))),
        other => Err(Error::precondition(format!(
            "{} of {REPLICA_COUNT} members running",
            other.unwrap_or_default()
        ))),
    }
}

async fn check_service(
    target: &Target<'_>,
    ctx: &Context,
    status: RedisHAStatus,
) -> Result<Step, Error> {
    let exists = ctx
        .store
        .service_exists(&target.namespace, &target.name)
        .await?;

    let next = if exists {
        Phase::SetCredential
    } else {
        Phase::CreateService
    };
    Ok(Step::Advance(status.phase(next)))
}

async fn create_service(
    target: &Target<'_>,
    ctx: &Context,
    status: RedisHAStatus,
) -> Result<Step, Error> {
    let service = build_service(target.redis)?;
    ctx.store.create_service(&service).await?;

    let address = ctx
        .config
        .service_address(&target.name, &target.namespace);
    Ok(Step::Advance(
        status
            .endpoint(address, REDIS_PORT)
            .phase(Phase::SetCredential),
    ))
}

async fn set_credential(
    target: &Target<'_>,
    ctx: &Context,
    status: RedisHAStatus,
) -> Result<Step, Error> {
    if status.credential_installed {
        return Ok(Step::Advance(status.phase(Phase::CheckReplication)));
    }

    let command = ctx.credentials.install_command();
    for ordinal in [PRIMARY_ORDINAL, REPLICA_ORDINAL] {
        let pod = target.member(ordinal);
        ctx.exec
            .execute(&target.namespace, &pod, &target.name, command.clone())
            .await?;
        debug!(%pod, "credentials installed on member");
    }

    Ok(Step::Advance(
        status
            .credential_installed()
            .phase(Phase::CheckReplication),
    ))
}

fn check_replication(status: RedisHAStatus) -> Step {
    let next = if status.replication_established {
        Phase::Normal
    } else {
        Phase::CreateReplication
    };
    Step::Advance(status.phase(next))
}

async fn create_replication(
    target: &Target<'_>,
    ctx: &Context,
    status: RedisHAStatus,
) -> Result<Step, Error> {
    let primary = target.member(PRIMARY_ORDINAL);
    let replica = target.member(REPLICA_ORDINAL);

    let ip = ctx
        .store
        .pod_ip(&target.namespace, &primary)
        .await?
        .ok_or_else(|| Error::precondition(format!("{primary} has no pod IP yet")))?;

    let output = ctx
        .exec
        .execute(
            &target.namespace,
            &replica,
            &target.name,
            replication_command(&ip),
        )
        .await?;

    if !output.contains("OK") {
        return Err(Error::precondition(format!(
            "{replica} did not accept replication: {:?}",
            output.trim()
        )));
    }

    info!(%primary, %replica, primary_ip = %ip, "replication established");
    Ok(Step::Advance(
        status.replication_established().phase(Phase::Normal),
    ))
}

fn check_delete(status: RedisHAStatus, deleting: bool) -> Step {
    let next = if deleting {
        Phase::ProcessDelete
    } else {
        Phase::Normal
    };
    Step::Advance(status.phase(next))
}

async fn process_delete(
    target: &Target<'_>,
    ctx: &Context,
    status: RedisHAStatus,
) -> Result<Step, Error> {
    // Children carry ownerReferences and are collected by the garbage collector
    ctx.store
        .remove_finalizer(&target.namespace, &target.name)
        .await?;
    Ok(Step::Release(status.phase(Phase::Normal)))
}

/// Steady state: watch for deletion, otherwise idle
async fn normal(
    target: &Target<'_>,
    ctx: &Context,
    status: RedisHAStatus,
    deleting: bool,
) -> Action {
    if deleting {
        let next = status.phase(Phase::ProcessDelete);
        let version = target.redis.resource_version();
        match ctx
            .store
            .patch_status(&target.namespace, &target.name, version, &next)
            .await
        {
            Ok(()) => info!(from = %Phase::Normal, to = %Phase::ProcessDelete, "phase transition"),
            Err(e) => warn!(error = %e, "failed to enter delete path"),
        }
    }
    Action::requeue(NORMAL_INTERVAL)
}

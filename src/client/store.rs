//! Object store operations against the Kubernetes API
//!
//! [`ObjectStore`] is the seam the controller talks through. The real
//! implementation, [`KubeObjectStore`], builds on two generic helpers:
//! [`create_if_absent`] and [`patch_object`]. The second one is a three-way
//! patch keyed on a last-applied annotation.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Endpoints, Pod, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::crd::{RedisHA, RedisHAStatus};
use crate::{Error, FIELD_MANAGER, FINALIZER};

/// Annotation holding the object as last written by the operator
pub const LAST_APPLIED_ANNOTATION: &str = "apps.operator-redis-ha.org/last-applied";

/// Result of an idempotent create
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object was created by this call
    Created,
    /// An object with the same name was already there
    AlreadyExists,
}

/// Result of a create-or-patch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The object did not exist and was created
    Created,
    /// The stored object differed and was replaced
    Applied,
    /// The stored object already matched
    Unchanged,
}

/// Trait abstracting the Kubernetes API calls the controller makes
///
/// Existence checks map 404 to `false`/`None` rather than an error, so the
/// caller can branch on absence.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether the StatefulSet exists
    async fn statefulset_exists(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Create the StatefulSet, or patch it toward the desired shape
    async fn apply_statefulset(&self, statefulset: &StatefulSet) -> Result<PatchOutcome, Error>;

    /// Members of the StatefulSet that are running and ready, `None` when absent
    async fn running_replicas(&self, namespace: &str, name: &str) -> Result<Option<i32>, Error>;

    /// Whether the Service exists
    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Create the Service unless one with that name exists
    async fn create_service(&self, service: &Service) -> Result<CreateOutcome, Error>;

    /// Create the budget, or patch it toward the desired shape
    async fn apply_pod_disruption_budget(
        &self,
        pdb: &PodDisruptionBudget,
    ) -> Result<PatchOutcome, Error>;

    /// Pod IP, `None` while the pod is absent or unscheduled
    async fn pod_ip(&self, namespace: &str, pod: &str) -> Result<Option<String>, Error>;

    /// Comma-separated `ip:port` list from an Endpoints object
    async fn etcd_endpoints(&self, namespace: &str, name: &str) -> Result<String, Error>;

    /// Merge-patch the RedisHA status
    ///
    /// When `resource_version` is given the write only succeeds against that
    /// version; a stale write returns [`Error::Conflict`].
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &RedisHAStatus,
    ) -> Result<(), Error>;

    /// Add the operator finalizer if it is missing
    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Remove the operator finalizer; a vanished object counts as success
    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Objects the generic patch helper can reconcile
///
/// Implementors copy fields the API server refuses to change from the stored
/// object onto the replacement.
pub trait Patchable:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync
{
    /// Carry immutable fields over from `stored`
    fn keep_immutable(&mut self, _stored: &Self) {}
}

impl Patchable for StatefulSet {
    fn keep_immutable(&mut self, stored: &Self) {
        if let (Some(desired), Some(current)) = (self.spec.as_mut(), stored.spec.as_ref()) {
            desired.volume_claim_templates = current.volume_claim_templates.clone();
            desired.selector = current.selector.clone();
        }
    }
}

impl Patchable for Service {}

impl Patchable for PodDisruptionBudget {}

/// Serialized form used for comparisons: no status, no last-applied annotation
fn comparable<K: Patchable>(obj: &K) -> Result<serde_json::Value, Error> {
    let mut value =
        serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))?;
    if let Some(map) = value.as_object_mut() {
        map.remove("status");
    }
    if let Some(annotations) = value
        .pointer_mut("/metadata/annotations")
        .and_then(|a| a.as_object_mut())
    {
        annotations.remove(LAST_APPLIED_ANNOTATION);
        if annotations.is_empty() {
            if let Some(meta) = value.get_mut("metadata").and_then(|m| m.as_object_mut()) {
                meta.remove("annotations");
            }
        }
    }
    Ok(value)
}

/// Stamp the last-applied annotation onto an object about to be written
pub fn set_last_applied<K: Patchable>(obj: &mut K) -> Result<(), Error> {
    let snapshot = comparable(obj)?.to_string();
    obj.annotations_mut()
        .insert(LAST_APPLIED_ANNOTATION.to_string(), snapshot);
    Ok(())
}

/// Decide how to move `stored` toward `desired`
///
/// Returns `None` when the last-applied snapshot already equals `desired`.
/// Otherwise returns the replacement object. It carries over the stored
/// resourceVersion, creation timestamp and managed fields, keeps immutable
/// sub-fields and stored annotations, and snapshots `desired` as last applied.
pub fn plan_patch<K: Patchable>(stored: &K, desired: &K) -> Result<Option<K>, Error> {
    let original = stored
        .annotations()
        .get(LAST_APPLIED_ANNOTATION)
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
        .unwrap_or(serde_json::Value::Null);
    let modified = comparable(desired)?;

    let diff = json_patch::diff(&original, &modified);
    if diff.0.is_empty() {
        return Ok(None);
    }
    debug!(
        name = %desired.name_any(),
        operations = diff.0.len(),
        "changes detected against last applied state"
    );

    let mut next = desired.clone();
    {
        let meta = next.meta_mut();
        let current = stored.meta();
        meta.resource_version = current.resource_version.clone();
        meta.creation_timestamp = current.creation_timestamp.clone();
        meta.managed_fields = current.managed_fields.clone();
        meta.uid = current.uid.clone();
    }
    next.keep_immutable(stored);

    // The snapshot records intent, not the merged result
    let stored_annotations = stored.annotations().clone();
    let annotations = next.annotations_mut();
    for (key, value) in stored_annotations {
        annotations.entry(key).or_insert(value);
    }
    annotations.insert(LAST_APPLIED_ANNOTATION.to_string(), modified.to_string());

    Ok(Some(next))
}

/// Create `desired` unless an object with the same name exists
pub async fn create_if_absent<K: Patchable>(
    api: &Api<K>,
    desired: &K,
) -> Result<CreateOutcome, Error> {
    let mut obj = desired.clone();
    set_last_applied(&mut obj)?;

    match api.create(&PostParams::default(), &obj).await {
        Ok(_) => Ok(CreateOutcome::Created),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(CreateOutcome::AlreadyExists),
        Err(e) => Err(e.into()),
    }
}

/// Create `desired`, or replace the stored object when it drifted
pub async fn patch_object<K: Patchable>(api: &Api<K>, desired: &K) -> Result<PatchOutcome, Error> {
    let name = desired.name_any();

    let Some(stored) = api.get_opt(&name).await? else {
        return match create_if_absent(api, desired).await? {
            CreateOutcome::Created => Ok(PatchOutcome::Created),
            // Lost a race with another writer; the next tick patches it
            CreateOutcome::AlreadyExists => Ok(PatchOutcome::Unchanged),
        };
    };

    match plan_patch(&stored, desired)? {
        None => Ok(PatchOutcome::Unchanged),
        Some(next) => {
            api.replace(&name, &PostParams::default(), &next).await?;
            Ok(PatchOutcome::Applied)
        }
    }
}

/// Render an Endpoints object as `ip:port[,ip:port...]`
///
/// Uses the first subset and its first port, like the etcd client expects.
pub fn format_endpoints(endpoints: &Endpoints) -> Result<String, Error> {
    let name = endpoints.name_any();
    let subset = endpoints
        .subsets
        .as_ref()
        .and_then(|s| s.first())
        .ok_or_else(|| Error::precondition(format!("endpoints {name} has no subsets")))?;
    let port = subset
        .ports
        .as_ref()
        .and_then(|p| p.first())
        .map(|p| p.port)
        .ok_or_else(|| Error::precondition(format!("endpoints {name} has no ports")))?;
    let addresses = subset
        .addresses
        .as_ref()
        .filter(|a| !a.is_empty())
        .ok_or_else(|| Error::precondition(format!("endpoints {name} has no addresses")))?;

    Ok(addresses
        .iter()
        .map(|a| format!("{}:{port}", a.ip))
        .collect::<Vec<_>>()
        .join(","))
}

/// Members counted as running: `status.readyReplicas`
///
/// `currentReplicas` also counts pods that were created but never passed
/// their readiness probe.
pub fn running_members(statefulset: &StatefulSet) -> i32 {
    statefulset
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or_default()
}

/// Real Kubernetes implementation of [`ObjectStore`]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    /// Create a new KubeObjectStore wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn statefulset_exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<StatefulSet> = self.api(namespace);
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn apply_statefulset(&self, statefulset: &StatefulSet) -> Result<PatchOutcome, Error> {
        let namespace = statefulset
            .namespace()
            .ok_or_else(|| Error::precondition("statefulset has no namespace"))?;
        let outcome = patch_object(&self.api::<StatefulSet>(&namespace), statefulset).await?;
        info!(statefulset = %statefulset.name_any(), ?outcome, "statefulset ensured");
        Ok(outcome)
    }

    async fn running_replicas(&self, namespace: &str, name: &str) -> Result<Option<i32>, Error> {
        let api: Api<StatefulSet> = self.api(namespace);
        Ok(api.get_opt(name).await?.as_ref().map(running_members))
    }

    async fn service_exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<Service> = self.api(namespace);
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn create_service(&self, service: &Service) -> Result<CreateOutcome, Error> {
        let namespace = service
            .namespace()
            .ok_or_else(|| Error::precondition("service has no namespace"))?;
        let outcome = create_if_absent(&self.api::<Service>(&namespace), service).await?;
        info!(service = %service.name_any(), ?outcome, "service ensured");
        Ok(outcome)
    }

    async fn apply_pod_disruption_budget(
        &self,
        pdb: &PodDisruptionBudget,
    ) -> Result<PatchOutcome, Error> {
        let namespace = pdb
            .namespace()
            .ok_or_else(|| Error::precondition("pod disruption budget has no namespace"))?;
        let outcome = patch_object(&self.api::<PodDisruptionBudget>(&namespace), pdb).await?;
        debug!(pdb = %pdb.name_any(), ?outcome, "pod disruption budget reconciled");
        Ok(outcome)
    }

    async fn pod_ip(&self, namespace: &str, pod: &str) -> Result<Option<String>, Error> {
        let api: Api<Pod> = self.api(namespace);
        Ok(api
            .get_opt(pod)
            .await?
            .and_then(|p| p.status)
            .and_then(|s| s.pod_ip)
            .filter(|ip| !ip.is_empty()))
    }

    async fn etcd_endpoints(&self, namespace: &str, name: &str) -> Result<String, Error> {
        let api: Api<Endpoints> = self.api(namespace);
        let endpoints = api
            .get_opt(name)
            .await?
            .ok_or_else(|| Error::not_found(format!("endpoints {namespace}/{name}")))?;
        format_endpoints(&endpoints)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &RedisHAStatus,
    ) -> Result<(), Error> {
        let api: Api<RedisHA> = self.api(namespace);

        let mut patch = serde_json::json!({ "status": status });
        if let Some(version) = resource_version {
            patch["metadata"] = serde_json::json!({ "resourceVersion": version });
        }

        match api
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::conflict(format!(
                "status of {namespace}/{name} changed underneath us: {}",
                ae.message
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<RedisHA> = self.api(namespace);

        let redis = api.get(name).await?;
        let mut finalizers = redis.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == FINALIZER) {
            return Ok(());
        }
        finalizers.push(FINALIZER.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;

        info!(redis_ha = %name, "added finalizer");
        Ok(())
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<RedisHA> = self.api(namespace);

        let Some(redis) = api.get_opt(name).await? else {
            return Ok(());
        };
        let finalizers: Vec<String> = redis
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != FINALIZER)
            .collect();

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        match api
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => return Err(e.into()),
        }

        info!(redis_ha = %name, "removed finalizer");
        Ok(())
    }
}

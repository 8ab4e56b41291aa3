//! Child objects owned by a RedisHA
//!
//! Pure builders for the objects the controller creates:
//! - StatefulSet: the two Redis members
//! - Service: client endpoint on port 6379
//! - PodDisruptionBudget: keeps at least one member up during voluntary evictions
//!
//! Every object carries the same selector labels and a controller
//! ownerReference back to the RedisHA so it is garbage-collected with it.

mod disruption;
mod service;
mod statefulset;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::RedisHA;
use crate::Error;

pub use disruption::{build_pod_disruption_budget, pdb_name};
pub use service::build_service;
pub use statefulset::{build_statefulset, member_name, PRIMARY_ORDINAL, REPLICA_ORDINAL};

/// Label value shared by every RedisHA child
const SETUP_TYPE: &str = "ha";

/// Selector labels for a RedisHA's children, merged over the resource's own labels
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), name.to_string()),
        ("redis_setup_type".to_string(), SETUP_TYPE.to_string()),
        ("role".to_string(), SETUP_TYPE.to_string()),
    ])
}

/// Labels stamped on child object metadata
pub fn object_labels(redis: &RedisHA) -> BTreeMap<String, String> {
    let mut labels = redis.labels().clone();
    labels.extend(selector_labels(&redis.name_any()));
    labels
}

/// Controller ownerReference pointing at the RedisHA
pub fn owner_reference(redis: &RedisHA) -> Result<OwnerReference, Error> {
    let mut owner = redis
        .controller_owner_ref(&())
        .ok_or_else(|| Error::precondition("RedisHA has no uid yet"))?;
    owner.block_owner_deletion = Some(true);
    Ok(owner)
}

/// Namespace of the RedisHA, which every child shares
pub fn namespace_of(redis: &RedisHA) -> Result<String, Error> {
    redis
        .namespace()
        .ok_or_else(|| Error::precondition("RedisHA must be namespaced"))
}

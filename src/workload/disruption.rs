//! PodDisruptionBudget guarding the pair

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use super::{namespace_of, object_labels, owner_reference, selector_labels};
use crate::crd::RedisHA;
use crate::Error;

/// Name of the budget for a RedisHA
pub fn pdb_name(name: &str) -> String {
    format!("{name}-pdb")
}

/// Build a budget that keeps at least one member available
pub fn build_pod_disruption_budget(redis: &RedisHA) -> Result<PodDisruptionBudget, Error> {
    let name = redis.name_any();

    Ok(PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(pdb_name(&name)),
            namespace: Some(namespace_of(redis)?),
            labels: Some(object_labels(redis)),
            owner_references: Some(vec![owner_reference(redis)?]),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(IntOrString::Int(1)),
            selector: Some(LabelSelector {
                match_labels: Some(selector_labels(&name)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    })
}

//! RedisHA Custom Resource Definition
//!
//! A RedisHA describes one primary/replica Redis pair. The controller owns
//! everything under `status`; users only ever edit `spec`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{KubernetesConfig, Phase, RedisConfig, Storage};

/// Specification for a RedisHA pair
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apps.operator-redis-ha.org",
    version = "v1alpha1",
    kind = "RedisHA",
    plural = "redishas",
    shortname = "rha",
    status = "RedisHAStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"integer","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Replicating","type":"boolean","jsonPath":".status.replicationEstablished"}"#,
    printcolumn = r#"{"name":"Address","type":"string","jsonPath":".status.resolvedAddress"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisHASpec {
    /// Image, pull policy and resources for the Redis container
    pub kubernetes_config: KubernetesConfig,

    /// Extra Redis configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_config: Option<RedisConfig>,

    /// Persistent storage; when absent the members run without a data volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<Storage>,

    /// Node selector copied onto the pod template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Affinity copied onto the pod template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    /// Tolerations copied onto the pod template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
}

impl RedisHASpec {
    /// Whether members get a persistent data volume
    pub fn persistence_enabled(&self) -> bool {
        self.storage.is_some()
    }

    /// ConfigMap holding additional Redis configuration, if any
    pub fn external_config(&self) -> Option<&str> {
        self.redis_config
            .as_ref()
            .and_then(|c| c.additional_redis_config.as_deref())
    }
}

/// Observed state of a RedisHA pair
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedisHAStatus {
    /// Current reconciliation phase
    #[serde(default)]
    pub phase: Phase,

    /// Set once the replica follows the primary; never cleared
    #[serde(default)]
    pub replication_established: bool,

    /// Client address, published once the Service exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_address: Option<String>,

    /// Client port, published together with the address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_port: Option<i32>,

    /// Set once every member has the etcd client credentials; never cleared
    #[serde(default)]
    pub credential_installed: bool,
}

impl RedisHAStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: Phase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Set the phase and return self for chaining
    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    /// Record the published network identity
    pub fn endpoint(mut self, address: impl Into<String>, port: i32) -> Self {
        self.resolved_address = Some(address.into());
        self.resolved_port = Some(port);
        self
    }

    /// Mark replication as wired
    pub fn replication_established(mut self) -> Self {
        self.replication_established = true;
        self
    }

    /// Mark credentials as installed on every member
    pub fn credential_installed(mut self) -> Self {
        self.credential_installed = true;
        self
    }
}

//! Supporting types for the RedisHA CRD

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, ResourceRequirements};
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Position of a RedisHA resource in the reconciliation state machine
///
/// Persisted in status as a plain integer. The codes are part of the stored
/// API and must never be renumbered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "i32", into = "i32")]
pub enum Phase {
    /// Freshly created resource
    #[default]
    Start,
    /// Decide whether deletion is pending
    CheckDelete,
    /// Run finalizer cleanup and release the object
    ProcessDelete,
    /// Look for the StatefulSet
    CheckWorkload,
    /// Create the StatefulSet and its disruption budget
    CreateWorkload,
    /// Wait for both members to be running
    CheckPods,
    /// Look for the client Service
    CheckService,
    /// Create the client Service and publish the address
    CreateService,
    /// Decide whether replication still needs wiring
    CheckReplication,
    /// Point the replica at the primary
    CreateReplication,
    /// Reserved; behaves as [`Phase::CheckReplication`]
    FixServerProcess,
    /// Reserved; behaves as [`Phase::CheckReplication`]
    ForceRedoPod,
    /// Converged; periodic re-check
    Normal,
    /// Install etcd client credentials on every member
    SetCredential,
    /// A stored code this build does not know
    Unrecognized(i32),
}

impl Phase {
    /// Stable integer code stored in `status.phase`
    pub fn code(self) -> i32 {
        match self {
            Self::Start => 0,
            Self::CheckDelete => 1,
            Self::ProcessDelete => 2,
            Self::CheckWorkload => 3,
            Self::CreateWorkload => 4,
            Self::CheckPods => 5,
            Self::CheckService => 6,
            Self::CreateService => 7,
            Self::CheckReplication => 8,
            Self::CreateReplication => 9,
            Self::FixServerProcess => 10,
            Self::ForceRedoPod => 11,
            Self::Normal => 12,
            Self::SetCredential => 13,
            Self::Unrecognized(code) => code,
        }
    }
}

impl From<i32> for Phase {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Start,
            1 => Self::CheckDelete,
            2 => Self::ProcessDelete,
            3 => Self::CheckWorkload,
            4 => Self::CreateWorkload,
            5 => Self::CheckPods,
            6 => Self::CheckService,
            7 => Self::CreateService,
            8 => Self::CheckReplication,
            9 => Self::CreateReplication,
            10 => Self::FixServerProcess,
            11 => Self::ForceRedoPod,
            12 => Self::Normal,
            13 => Self::SetCredential,
            other => Self::Unrecognized(other),
        }
    }
}

impl From<Phase> for i32 {
    fn from(phase: Phase) -> Self {
        phase.code()
    }
}

impl JsonSchema for Phase {
    fn is_referenceable() -> bool {
        false
    }

    fn schema_name() -> String {
        "Phase".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        i32::json_schema(gen)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::CheckDelete => write!(f, "CheckDelete"),
            Self::ProcessDelete => write!(f, "ProcessDelete"),
            Self::CheckWorkload => write!(f, "CheckWorkload"),
            Self::CreateWorkload => write!(f, "CreateWorkload"),
            Self::CheckPods => write!(f, "CheckPods"),
            Self::CheckService => write!(f, "CheckService"),
            Self::CreateService => write!(f, "CreateService"),
            Self::CheckReplication => write!(f, "CheckReplication"),
            Self::CreateReplication => write!(f, "CreateReplication"),
            Self::FixServerProcess => write!(f, "FixServerProcess"),
            Self::ForceRedoPod => write!(f, "ForceRedoPod"),
            Self::Normal => write!(f, "Normal"),
            Self::SetCredential => write!(f, "SetCredential"),
            Self::Unrecognized(code) => write!(f, "Unrecognized({code})"),
        }
    }
}

/// Container settings for the Redis members
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesConfig {
    /// Redis server image
    pub image: String,

    /// Image pull policy (Always, IfNotPresent, Never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Compute resources for the Redis container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

/// Extra Redis configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedisConfig {
    /// Name of a ConfigMap mounted into `/etc/redis/external.conf.d`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_redis_config: Option<String>,
}

/// Persistent storage for the Redis data directory
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    /// Template for the per-member claim; access mode and volume mode are
    /// defaulted when omitted
    pub volume_claim_template: PersistentVolumeClaim,
}

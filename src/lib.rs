//! Redis HA operator - keeps a primary/replica Redis pair running for each RedisHA
//!
//! Each `RedisHA` custom resource owns a two-member StatefulSet, a client
//! Service and a PodDisruptionBudget. The controller walks every resource
//! through a persisted phase machine. It creates the workload, wires
//! replication (`<name>-1` replicates `<name>-0`), installs etcd client
//! credentials into both members, and then settles into periodic
//! verification.
//!
//! # Modules
//!
//! - [`crd`] - The RedisHA custom resource and its phase encoding
//! - [`controller`] - Phase-driven reconciliation
//! - [`client`] - Kubernetes object store and pod exec abstractions
//! - [`workload`] - Builders for the StatefulSet, Service and PodDisruptionBudget
//! - [`credentials`] - etcd client certificates pushed into Redis pods
//! - [`config`] - Runtime settings shared by every reconcile
//! - [`telemetry`] - Tracing subscriber setup
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

use std::time::Duration;

pub mod client;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod crd;
pub mod error;
pub mod telemetry;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Port Redis listens on, exposed by the Service
pub const REDIS_PORT: i32 = 6379;

/// Members per RedisHA: one primary, one replica
pub const REPLICA_COUNT: i32 = 2;

/// Default cluster DNS suffix used to build the published address
pub const DEFAULT_CLUSTER_DOMAIN: &str = "svc.cluster.local";

/// Requeue delay between verification passes once a resource is Normal
pub const NORMAL_INTERVAL: Duration = Duration::from_secs(10);

/// Requeue delay after a failed step
pub const EVENT_INTERVAL: Duration = Duration::from_secs(20);

/// Finalizer guarding RedisHA deletion
pub const FINALIZER: &str = "apps.operator-redis-ha.org/finalizer";

/// Field manager recorded on writes made by the operator
pub const FIELD_MANAGER: &str = "redis-ha-operator";

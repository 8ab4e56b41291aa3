//! Controller for RedisHA resources
//!
//! Reconciliation is a persisted phase machine driven by
//! `kube::runtime::Controller`, which serialises invocations per object and
//! owns the requeue timers.

mod redis_ha;

pub use redis_ha::{
    error_policy, primary_host, reconcile, replication_command, Context, ContextBuilder,
};

//! Integration tests for the RedisHA operator
//!
//! These tests require a Kubernetes cluster (kind) to run and exercise the
//! real API paths the controller depends on.
//!
//! # Test Organization
//!
//! - `crd_operations`: Stories about creating, reading and deleting RedisHA
//!   resources through the Kubernetes API, including the status subresource
//!
//! - `object_store`: Stories about the object store the controller writes
//!   through: idempotent creates, drift patches, fenced status writes and
//!   the finalizer
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored
//! ```

mod crd_operations;
mod helpers;
mod object_store;

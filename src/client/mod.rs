//! Collaborators the controller talks to
//!
//! - [`ObjectStore`]: reads and writes Kubernetes objects
//! - [`RemoteExec`]: runs commands inside Redis pods
//!
//! Both are traits so reconciliation can be tested with mocks.

mod exec;
mod store;

pub use exec::{failure_reason, PodExec, RemoteExec};
pub use store::{
    create_if_absent, format_endpoints, patch_object, plan_patch, running_members, set_last_applied,
    CreateOutcome, KubeObjectStore, ObjectStore, PatchOutcome, Patchable,
    LAST_APPLIED_ANNOTATION,
};

#[cfg(test)]
pub use exec::MockRemoteExec;
#[cfg(test)]
pub use store::MockObjectStore;

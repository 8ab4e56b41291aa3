//! Error types for the RedisHA operator

use thiserror::Error;

/// Main error type for RedisHA operations
///
/// Every variant except [`Error::Config`] is retried by the controller on the
/// next tick; none of them moves a resource into a terminal state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// An object the caller required does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A write raced with another writer (stale resourceVersion)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Remote command execution inside a pod failed
    #[error("exec error: {0}")]
    Exec(String),

    /// A check ran but its result did not satisfy the step
    #[error("precondition not met: {0}")]
    Precondition(String),

    /// Startup configuration is missing or unreadable
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error with the given message
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an exec error with the given message
    pub fn exec(msg: impl Into<String>) -> Self {
        Self::Exec(msg.into())
    }

    /// Create a precondition error with the given message
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// True for stale writes, whether raised locally or returned by the API server as 409
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Kube(kube::Error::Api(ae)) => ae.code == 409,
            _ => false,
        }
    }

    /// True when the target object is absent (local or API 404)
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    /// Whether the controller should try again on a later tick
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

//! Error types for the rolling update handler

use thiserror::Error;

/// Main error type for rolling update operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Cloud provider (auto-scaling / EC2) API error
    #[error("cloud error: {0}")]
    Cloud(String),

    /// The group's instances could not be partitioned into outdated/updated
    #[error("classification error: {0}")]
    Classification(String),

    /// No cluster node matches the given instance id
    #[error("no node found for hostname {0}")]
    NodeNotFound(String),

    /// Node drain failed or was refused by policy
    #[error("drain error: {0}")]
    Drain(String),
}

impl Error {
    /// Create a cloud error with the given message
    pub fn cloud(msg: impl Into<String>) -> Self {
        Self::Cloud(msg.into())
    }

    /// Create a classification error with the given message
    pub fn classification(msg: impl Into<String>) -> Self {
        Self::Classification(msg.into())
    }

    /// Create a drain error with the given message
    pub fn drain(msg: impl Into<String>) -> Self {
        Self::Drain(msg.into())
    }
}

//! asg-roller - rolling update handler for ASG-backed Kubernetes worker pools
//!
//! When an auto-scaling group's launch template or launch configuration
//! changes, the instances created from the previous revision become outdated.
//! This controller drives each outdated instance through an orderly
//! replacement: expand capacity, wait for the replacement node to join the
//! cluster and become schedulable, drain the outdated node, then terminate
//! the outdated instance through the ASG API.
//!
//! The controller itself is stateless. Every phase marker that must survive
//! a restart is persisted as an annotation on the node being replaced, and
//! requested capacity lives on the group's `DesiredCapacity`. A restart
//! mid-rollout reconstructs where it left off by reading those back.
//!
//! # Modules
//!
//! - [`cloud`] - Auto-scaling group and launch template access (AWS)
//! - [`cluster`] - Kubernetes node/pod access, drain, capacity arithmetic
//! - [`rollout`] - Drift classification, readiness evaluation, and the
//!   reconciliation engine
//! - [`config`] - Environment-driven configuration
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cloud;
pub mod cluster;
pub mod config;
pub mod error;
pub mod rollout;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Rollout annotation keys
// =============================================================================
// These three annotations are the only state the controller persists. They
// are only ever written to nodes backed by outdated instances; finding one on
// an up-to-date node means the group's launch spec changed mid-rollout and
// triggers cleanup in the readiness evaluator.

/// Set when the engine first observes an outdated node. RFC 3339 timestamp.
pub const STARTED_AT_ANNOTATION: &str = "asg-roller.dev/rolling-update-started-at";

/// Set after the node has been drained. RFC 3339 timestamp.
pub const DRAINED_AT_ANNOTATION: &str = "asg-roller.dev/rolling-update-drained-at";

/// Set after termination has been requested from the ASG. RFC 3339 timestamp.
pub const TERMINATED_AT_ANNOTATION: &str = "asg-roller.dev/rolling-update-terminated-at";

/// Interval between reconciliation ticks, measured from tick end to tick start.
pub const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(20);

//! Rollout phase derivation
//!
//! The phase of an outdated node is never cached: it is recomputed from the
//! node's annotations on every tick, which is what makes the controller safe
//! to restart mid-rollout. The derivation is total over every annotation
//! combination, including ones no legal run produces.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::warn;

use crate::{DRAINED_AT_ANNOTATION, STARTED_AT_ANNOTATION, TERMINATED_AT_ANNOTATION};

/// Where an outdated node stands in its replacement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RolloutPhase {
    /// No marker yet; the node has not been claimed by a rollout
    NotStarted,
    /// Claimed; waiting for enough updated capacity to drain into
    Started,
    /// Drained; termination has not been requested yet
    Drained,
    /// Termination requested; waiting for the instance to disappear
    Terminated,
}

/// The rollout timestamps read off a node's annotations.
///
/// A present-but-unparseable timestamp counts as absent, so a corrupted
/// marker regresses the phase and the step is redone rather than skipped.
#[derive(Clone, Copy, Debug, Default)]
pub struct RolloutMarkers {
    /// When the rollout claimed the node
    pub started_at: Option<DateTime<Utc>>,
    /// When the drain completed
    pub drained_at: Option<DateTime<Utc>>,
    /// When termination was requested
    pub terminated_at: Option<DateTime<Utc>>,
}

impl RolloutMarkers {
    /// Read the markers from a node.
    pub fn from_node(node: &Node) -> Self {
        let Some(annotations) = node.metadata.annotations.as_ref() else {
            return Self::default();
        };
        let parse = |key: &str| {
            let value = annotations.get(key)?;
            match DateTime::parse_from_rfc3339(value) {
                Ok(parsed) => Some(parsed.with_timezone(&Utc)),
                Err(error) => {
                    warn!(
                        node = %node.name_any(),
                        key,
                        value = %value,
                        %error,
                        "unparseable rollout timestamp, treating marker as absent"
                    );
                    None
                }
            }
        };
        Self {
            started_at: parse(STARTED_AT_ANNOTATION),
            drained_at: parse(DRAINED_AT_ANNOTATION),
            terminated_at: parse(TERMINATED_AT_ANNOTATION),
        }
    }

    /// Derive the phase from which markers are present.
    ///
    /// Later markers win over missing earlier ones: `terminated-at` alone
    /// still means the termination was requested, so the node is treated as
    /// terminated (and the inconsistency logged) instead of being re-claimed.
    pub fn phase(&self) -> RolloutPhase {
        match (self.started_at, self.drained_at, self.terminated_at) {
            (started, drained, Some(_)) => {
                if started.is_none() || drained.is_none() {
                    warn!("node carries a termination marker without the earlier markers");
                }
                RolloutPhase::Terminated
            }
            (started, Some(_), None) => {
                if started.is_none() {
                    warn!("node carries a drain marker without a start marker");
                }
                RolloutPhase::Drained
            }
            (Some(_), None, None) => RolloutPhase::Started,
            (None, None, None) => RolloutPhase::NotStarted,
        }
    }
}

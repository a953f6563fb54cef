//! Readiness evaluation for updated capacity
//!
//! Counts how much of the group's updated capacity is actually able to take
//! workloads. Anything that is promised but not usable yet - an instance
//! still pending, a node that has not joined or is not Ready, or capacity
//! the group has been asked for but has not materialized - counts as
//! non-ready and holds the rollout back for the tick.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::cloud::{AutoScalingGroup, Instance, LIFECYCLE_STATE_IN_SERVICE};
use crate::cluster::ClusterClient;
use crate::STARTED_AT_ANNOTATION;

/// Result of evaluating a group's updated instances.
#[derive(Clone, Debug, Default)]
pub struct Readiness {
    /// Nodes backed by updated instances that are `InService` and Ready
    pub ready_nodes: Vec<Node>,
    /// Updated instances or nodes that are not ready yet, plus capacity the
    /// group has requested but not materialized
    pub non_ready: usize,
}

/// Evaluate the readiness of the group's updated instances and clean up
/// stray rollout state left on updated nodes by a mid-rollout launch-spec
/// change.
pub async fn evaluate_readiness(
    cluster: &dyn ClusterClient,
    group: &AutoScalingGroup,
    updated: &[Instance],
) -> Readiness {
    // Desired capacity above the member count is an instance the group has
    // promised but not created yet. Counting it here keeps the engine from
    // requesting the same expansion again on every tick until it shows up.
    let pending = (group.desired_capacity as usize).saturating_sub(group.instances.len());
    if pending > 0 {
        debug!(group = %group.name, pending, "group has requested capacity that has not materialized");
    }

    let mut readiness = Readiness {
        ready_nodes: Vec::new(),
        non_ready: pending,
    };

    for instance in updated {
        if instance.lifecycle_state != LIFECYCLE_STATE_IN_SERVICE {
            info!(
                group = %group.name,
                instance = %instance.instance_id,
                state = %instance.lifecycle_state,
                "updated instance is not in service yet"
            );
            readiness.non_ready += 1;
            continue;
        }
        let mut node = match cluster.get_node_by_hostname(&instance.instance_id).await {
            Ok(node) => node,
            Err(error) => {
                info!(
                    group = %group.name,
                    instance = %instance.instance_id,
                    %error,
                    "updated instance has no node yet"
                );
                readiness.non_ready += 1;
                continue;
            }
        };

        let ready = is_node_ready(&node);
        if !ready {
            readiness.non_ready += 1;
        }

        cleanup_stray_rollout_state(cluster, &group.name, &mut node).await;

        if ready {
            readiness.ready_nodes.push(node);
        }
    }
    readiness
}

/// Whether the kubelet reports the node ready to accept pods.
///
/// Only the last `status.conditions` entry is consulted; on the clusters
/// this controller manages the kubelet appends `Ready` last. Selecting by
/// type would be more robust but would change observed behavior.
fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| conditions.last())
        .is_some_and(|condition| condition.type_ == "Ready" && condition.status == "True")
}

/// Recover an updated node still carrying the started-at marker.
///
/// Happens when a launch template is modified mid-rollout and the new
/// version matches what the node was built from, flipping it from outdated
/// back to updated after it was already claimed (and possibly cordoned) by
/// the rollout. Any `NoSchedule` taint added after the rollout claimed the
/// node is not the node's own; remove the first such taint together with
/// the marker. An unparseable marker is treated as predating every taint.
async fn cleanup_stray_rollout_state(
    cluster: &dyn ClusterClient,
    group_name: &str,
    node: &mut Node,
) {
    let Some(started_at_raw) = node
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(STARTED_AT_ANNOTATION))
        .cloned()
    else {
        return;
    };
    let started_at = DateTime::parse_from_rfc3339(&started_at_raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .ok();
    let node_name = node.name_any();

    let Some(taints) = node.spec.as_mut().and_then(|spec| spec.taints.as_mut()) else {
        return;
    };
    let stray = taints.iter().position(|taint| {
        taint.effect == "NoSchedule"
            && match (started_at, taint.time_added.as_ref()) {
                (None, _) => true,
                (Some(started), Some(added)) => added.0 > started,
                (Some(_), None) => false,
            }
    });
    let Some(index) = stray else {
        return;
    };
    taints.remove(index);

    warn!(
        group = %group_name,
        node = %node_name,
        "removed stray NoSchedule taint and rollout marker from updated node"
    );
    if let Some(annotations) = node.metadata.annotations.as_mut() {
        annotations.remove(STARTED_AT_ANNOTATION);
    }
    if let Err(error) = cluster.update_node(node).await {
        warn!(
            group = %group_name,
            node = %node_name,
            %error,
            "unable to update node after taint cleanup"
        );
    }
}

//! Reconciliation engine
//!
//! Advances each auto-scaling group's rollout by at most one cloud-mutating
//! step per tick. New capacity takes minutes to materialize and a tick only
//! ever sees a snapshot of the world, so bounding the work per tick bounds
//! the blast radius of a stale read: the worst a bad tick can do is one
//! capacity increment or one termination, both of which the next tick
//! observes and corrects for.

use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::classify::classify_instances;
use super::phase::{RolloutMarkers, RolloutPhase};
use super::readiness::evaluate_readiness;
use crate::cloud::{AutoScalingGroup, CloudProvider, Instance};
use crate::cluster::ClusterClient;
use crate::{DRAINED_AT_ANNOTATION, STARTED_AT_ANNOTATION, TERMINATED_AT_ANNOTATION};

/// Drain policy handed down from configuration.
#[derive(Clone, Copy, Debug)]
pub struct RolloutOptions {
    /// Skip DaemonSet-managed pods when draining
    pub ignore_daemon_sets: bool,
    /// Evict pods using emptyDir volumes when draining
    pub delete_local_data: bool,
}

/// The reconciliation engine. Holds the two adapter seams and the drain
/// policy; all rollout state lives on the nodes and groups it observes.
pub struct RollingUpdateHandler {
    cloud: Arc<dyn CloudProvider>,
    cluster: Arc<dyn ClusterClient>,
    options: RolloutOptions,
}

impl RollingUpdateHandler {
    /// Create a handler over the given adapters.
    pub fn new(
        cloud: Arc<dyn CloudProvider>,
        cluster: Arc<dyn ClusterClient>,
        options: RolloutOptions,
    ) -> Self {
        Self {
            cloud,
            cluster,
            options,
        }
    }

    /// Reconcile every group once. A failure in one group never aborts the
    /// others.
    pub async fn run(&self, groups: &[AutoScalingGroup]) {
        for group in groups {
            self.reconcile_group(group).await;
        }
    }

    /// Advance one group's rollout by at most one cloud-mutating step.
    pub async fn reconcile_group(&self, group: &AutoScalingGroup) {
        let classification = match classify_instances(self.cloud.as_ref(), group).await {
            Ok(classification) => classification,
            Err(error) => {
                warn!(group = %group.name, %error, "unable to classify instances, skipping group");
                return;
            }
        };
        debug!(
            group = %group.name,
            outdated = ?classification
                .outdated
                .iter()
                .map(|instance| instance.instance_id.as_str())
                .collect::<Vec<_>>(),
            updated = ?classification
                .updated
                .iter()
                .map(|instance| instance.instance_id.as_str())
                .collect::<Vec<_>>(),
            "classified instances"
        );

        let readiness =
            evaluate_readiness(self.cluster.as_ref(), group, &classification.updated).await;

        if classification.outdated.is_empty() {
            info!(group = %group.name, "all instances are up to date");
            return;
        }
        info!(
            group = %group.name,
            outdated = classification.outdated.len(),
            updated = classification.updated.len(),
            updated_ready = readiness.ready_nodes.len(),
            current = group.instances.len(),
            desired = group.desired_capacity,
            max = group.max_size,
            "group has outdated instances"
        );

        if readiness.non_ready > 0 {
            info!(
                group = %group.name,
                non_ready = readiness.non_ready,
                "waiting until all updated nodes and instances are ready"
            );
            return;
        }

        for instance in &classification.outdated {
            let node = match self
                .cluster
                .get_node_by_hostname(&instance.instance_id)
                .await
            {
                Ok(node) => node,
                Err(error) => {
                    warn!(
                        group = %group.name,
                        instance = %instance.instance_id,
                        %error,
                        "unable to get outdated node, skipping instance"
                    );
                    continue;
                }
            };

            match RolloutMarkers::from_node(&node).phase() {
                RolloutPhase::NotStarted => {
                    info!(
                        group = %group.name,
                        instance = %instance.instance_id,
                        "starting node rollout"
                    );
                    // Claiming a node touches no cloud state, so several nodes
                    // may be claimed in a single tick; keep going either way.
                    if let Err(error) = self
                        .cluster
                        .annotate_node_by_hostname(
                            &instance.instance_id,
                            STARTED_AT_ANNOTATION,
                            &Utc::now().to_rfc3339(),
                        )
                        .await
                    {
                        warn!(
                            group = %group.name,
                            instance = %instance.instance_id,
                            %error,
                            "unable to annotate node, skipping instance"
                        );
                    }
                }
                RolloutPhase::Started => {
                    match self
                        .cluster
                        .has_enough_resources_to_transfer(&node, &readiness.ready_nodes)
                        .await
                    {
                        Ok(true) => {
                            debug!(
                                group = %group.name,
                                instance = %instance.instance_id,
                                "updated nodes have enough spare capacity"
                            );
                            if self.drain_and_terminate(group, instance, &node).await {
                                return;
                            }
                        }
                        Ok(false) => {
                            let desired = group.desired_capacity + 1;
                            info!(
                                group = %group.name,
                                instance = %instance.instance_id,
                                desired,
                                "updated nodes lack capacity, expanding group"
                            );
                            if let Err(error) =
                                self.cloud.set_desired_capacity(group, desired).await
                            {
                                warn!(
                                    group = %group.name,
                                    %error,
                                    "unable to increase desired capacity, skipping instance"
                                );
                                continue;
                            }
                            return;
                        }
                        Err(error) => {
                            warn!(
                                group = %group.name,
                                instance = %instance.instance_id,
                                %error,
                                "capacity check failed, skipping instance"
                            );
                        }
                    }
                }
                RolloutPhase::Drained => {
                    if self.terminate(group, instance).await {
                        return;
                    }
                }
                RolloutPhase::Terminated => {
                    debug!(
                        group = %group.name,
                        instance = %instance.instance_id,
                        "termination already requested, waiting for instance removal"
                    );
                }
            }
        }
    }

    /// Drain the node, then request termination. Returns whether a
    /// cloud-mutating step happened, ending the group's tick.
    async fn drain_and_terminate(
        &self,
        group: &AutoScalingGroup,
        instance: &Instance,
        node: &Node,
    ) -> bool {
        info!(group = %group.name, instance = %instance.instance_id, "draining node");
        if let Err(error) = self
            .cluster
            .drain(
                &node.name_any(),
                self.options.ignore_daemon_sets,
                self.options.delete_local_data,
            )
            .await
        {
            warn!(
                group = %group.name,
                instance = %instance.instance_id,
                %error,
                "drain failed, skipping instance"
            );
            return false;
        }
        self.record_marker(group, instance, DRAINED_AT_ANNOTATION).await;
        self.terminate(group, instance).await
    }

    async fn terminate(&self, group: &AutoScalingGroup, instance: &Instance) -> bool {
        info!(
            group = %group.name,
            instance = %instance.instance_id,
            "requesting instance termination"
        );
        if let Err(error) = self.cloud.terminate_instance(instance).await {
            warn!(
                group = %group.name,
                instance = %instance.instance_id,
                %error,
                "unable to terminate instance, skipping instance"
            );
            return false;
        }
        self.record_marker(group, instance, TERMINATED_AT_ANNOTATION).await;
        true
    }

    /// Best-effort marker write after a step already happened. A lost marker
    /// only means the next tick re-observes and redoes an idempotent step.
    async fn record_marker(&self, group: &AutoScalingGroup, instance: &Instance, key: &str) {
        if let Err(error) = self
            .cluster
            .annotate_node_by_hostname(&instance.instance_id, key, &Utc::now().to_rfc3339())
            .await
        {
            warn!(
                group = %group.name,
                instance = %instance.instance_id,
                key,
                %error,
                "unable to record rollout marker"
            );
        }
    }
}

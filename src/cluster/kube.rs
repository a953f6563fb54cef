//! Kubernetes implementation of the cluster adapter

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use tracing::debug;

use super::resources::{allocatable, bound_requests, transferable_requests, ResourceTotals};
use super::{drain, ClusterClient, HOSTNAME_LABEL};
use crate::{Error, Result};

/// Cluster adapter backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: kube::Client,
}

impl KubeClusterClient {
    /// Wrap an already-connected client.
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    async fn pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let listed = pods
            .list(&ListParams::default().fields(&format!("spec.nodeName={node_name}")))
            .await?;
        Ok(listed.items)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_node_by_hostname(&self, instance_id: &str) -> Result<Node> {
        let listed = self
            .nodes()
            .list(&ListParams::default().labels(&format!("{HOSTNAME_LABEL}={instance_id}")))
            .await?;
        listed
            .items
            .into_iter()
            .next()
            .ok_or_else(|| Error::NodeNotFound(instance_id.to_string()))
    }

    async fn update_node(&self, node: &Node) -> Result<()> {
        self.nodes()
            .replace(&node.name_any(), &PostParams::default(), node)
            .await?;
        Ok(())
    }

    async fn annotate_node_by_hostname(
        &self,
        instance_id: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let node = self.get_node_by_hostname(instance_id).await?;
        let patch = serde_json::json!({
            "metadata": {
                "annotations": {
                    key: value,
                }
            }
        });
        self.nodes()
            .patch(&node.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn drain(
        &self,
        node_name: &str,
        ignore_daemon_sets: bool,
        delete_local_data: bool,
    ) -> Result<()> {
        drain::drain_node(&self.client, node_name, ignore_daemon_sets, delete_local_data).await
    }

    async fn has_enough_resources_to_transfer(
        &self,
        source: &Node,
        candidates: &[Node],
    ) -> Result<bool> {
        let needed = transferable_requests(&self.pods_on_node(&source.name_any()).await?);

        let mut spare = ResourceTotals::default();
        for candidate in candidates {
            let bound = bound_requests(&self.pods_on_node(&candidate.name_any()).await?);
            spare = spare + (allocatable(candidate) - bound);
        }

        debug!(
            source = %source.name_any(),
            needed_cpu_millis = needed.cpu_millis,
            needed_memory_bytes = needed.memory_bytes,
            spare_cpu_millis = spare.cpu_millis,
            spare_memory_bytes = spare.memory_bytes,
            "capacity sufficiency check"
        );
        Ok(needed.fits_within(spare))
    }
}

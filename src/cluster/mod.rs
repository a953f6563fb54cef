//! Cluster adapter: node and pod access
//!
//! Nodes are matched to cloud instances through the `kubernetes.io/hostname`
//! label, which carries the instance id on the worker pools this controller
//! manages. The [`ClusterClient`] trait is the engine's seam; the real
//! implementation lives in [`KubeClusterClient`] and tests swap in an
//! in-memory fake.

mod drain;
mod kube;
pub mod resources;

pub use self::kube::KubeClusterClient;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;

use crate::Result;

/// Node label holding the hostname, which equals the instance id.
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Outbound cluster operations the engine needs.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Look up the node whose hostname label equals the given instance id.
    ///
    /// Returns [`crate::Error::NodeNotFound`] when no such node exists;
    /// while a replacement instance is booting this is the expected state.
    async fn get_node_by_hostname(&self, instance_id: &str) -> Result<Node>;

    /// Replace the node object on the API server.
    async fn update_node(&self, node: &Node) -> Result<()>;

    /// Set one annotation on the node backing the given instance id.
    async fn annotate_node_by_hostname(
        &self,
        instance_id: &str,
        key: &str,
        value: &str,
    ) -> Result<()>;

    /// Cordon the named node and evict its pods.
    ///
    /// DaemonSet-managed pods abort the drain unless `ignore_daemon_sets`;
    /// pods using emptyDir volumes abort it unless `delete_local_data`.
    /// Mirror pods and completed pods are always left in place.
    async fn drain(
        &self,
        node_name: &str,
        ignore_daemon_sets: bool,
        delete_local_data: bool,
    ) -> Result<()>;

    /// Whether the candidate nodes have enough spare allocatable CPU and
    /// memory to absorb every non-DaemonSet pod currently on `source`.
    async fn has_enough_resources_to_transfer(
        &self,
        source: &Node,
        candidates: &[Node],
    ) -> Result<bool>;
}

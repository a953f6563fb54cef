//! Node drain via the eviction API
//!
//! The Kubernetes API has no server-side drain; like `kubectl drain` this
//! cordons the node and then evicts its pods one by one. Evictions are used
//! instead of deletions so PodDisruptionBudgets are respected: a blocked
//! eviction comes back as 429 and is retried at a fixed interval.
//!
//! The retry and wait policy is fixed. A drain that cannot finish inside it
//! fails the current tick and is retried from scratch on a later one.

use std::time::Duration;

use futures::{stream, StreamExt};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, EvictParams, ListParams};
use kube::ResourceExt;
use tracing::{debug, info};

use super::resources::{is_completed_pod, is_daemon_set_pod};
use crate::{Error, Result};

// Keeping eviction concurrency low bounds the request rate against the API
// server; eviction retries are slow anyway when PDBs are in play.
const CONCURRENT_EVICTIONS: usize = 5;

// `kubectl drain` waits 5 seconds between eviction attempts; so do we.
const EVICTION_RETRY_INTERVAL: Duration = Duration::from_secs(5);
const EVICTION_ATTEMPTS: u32 = 10;

const DELETION_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const DELETION_TIMEOUT: Duration = Duration::from_secs(300);

/// Cordon the node, then evict every pod selected by the drain policy and
/// wait for the evicted pods to disappear.
pub(crate) async fn drain_node(
    client: &kube::Client,
    node_name: &str,
    ignore_daemon_sets: bool,
    delete_local_data: bool,
) -> Result<()> {
    let nodes: Api<Node> = Api::all(client.clone());
    nodes.cordon(node_name).await?;
    debug!(node = %node_name, "node cordoned");

    let pods: Api<Pod> = Api::all(client.clone());
    let on_node = pods
        .list(&ListParams::default().fields(&format!("spec.nodeName={node_name}")))
        .await?;

    let targets = select_drain_targets(on_node.items, ignore_daemon_sets, delete_local_data)?;
    info!(node = %node_name, pods = targets.len(), "evicting pods");

    let failures: Vec<String> = stream::iter(targets)
        .map(|pod| {
            let client = client.clone();
            async move {
                evict_and_wait(&client, &pod)
                    .await
                    .err()
                    .map(|e| format!("{}/{}: {e}", pod.namespace().unwrap_or_default(), pod.name_any()))
            }
        })
        .buffer_unordered(CONCURRENT_EVICTIONS)
        .filter_map(|failure| async move { failure })
        .collect()
        .await;

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::drain(failures.join("; ")))
    }
}

/// Apply the drain policy to the pods found on the node.
///
/// Completed and mirror pods are silently left alone. DaemonSet pods are
/// skipped under `ignore_daemon_sets` and refuse the drain otherwise, since
/// the DaemonSet controller would fight the eviction. Pods using emptyDir
/// volumes refuse the drain unless `delete_local_data`, because eviction
/// destroys their data.
fn select_drain_targets(
    pods: Vec<Pod>,
    ignore_daemon_sets: bool,
    delete_local_data: bool,
) -> Result<Vec<Pod>> {
    let mut targets = Vec::new();
    for pod in pods {
        if is_completed_pod(&pod) || is_mirror_pod(&pod) {
            continue;
        }
        if is_daemon_set_pod(&pod) {
            if ignore_daemon_sets {
                debug!(pod = %pod.name_any(), "not evicting DaemonSet-managed pod");
                continue;
            }
            return Err(Error::drain(format!(
                "pod {} is managed by a DaemonSet and IGNORE_DAEMON_SETS is disabled",
                pod.name_any()
            )));
        }
        if uses_local_storage(&pod) && !delete_local_data {
            return Err(Error::drain(format!(
                "pod {} uses emptyDir volumes and DELETE_LOCAL_DATA is disabled",
                pod.name_any()
            )));
        }
        targets.push(pod);
    }
    Ok(targets)
}

fn is_mirror_pod(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .map(|annotations| annotations.contains_key("kubernetes.io/config.mirror"))
        .unwrap_or(false)
}

fn uses_local_storage(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .map(|volumes| volumes.iter().any(|volume| volume.empty_dir.is_some()))
        .unwrap_or(false)
}

async fn evict_and_wait(client: &kube::Client, pod: &Pod) -> Result<()> {
    let namespace = pod.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Pod> = Api::namespaced(client.clone(), &namespace);
    let name = pod.name_any();

    let mut attempts = 0;
    loop {
        match api.evict(&name, &EvictParams::default()).await {
            Ok(_) => break,
            // Already gone; nothing left to wait for.
            Err(kube::Error::Api(err)) if err.code == 404 => return Ok(()),
            // 429: a PodDisruptionBudget is not yet satisfied. 500: commonly
            // overlapping PDBs; retried the same way kubectl does.
            Err(kube::Error::Api(err)) if err.code == 429 || err.code == 500 => {
                attempts += 1;
                if attempts >= EVICTION_ATTEMPTS {
                    return Err(Error::drain(format!(
                        "giving up on evicting pod {name} after {attempts} attempts: {}",
                        err.message
                    )));
                }
                debug!(pod = %name, code = err.code, "eviction blocked, retrying");
                tokio::time::sleep(EVICTION_RETRY_INTERVAL).await;
            }
            Err(err) => return Err(err.into()),
        }
    }

    wait_for_deletion(&api, &name, pod.uid()).await
}

async fn wait_for_deletion(api: &Api<Pod>, name: &str, uid: Option<String>) -> Result<()> {
    let deadline = tokio::time::Instant::now() + DELETION_TIMEOUT;
    loop {
        match api.get_opt(name).await? {
            None => return Ok(()),
            // A new pod under the same name means the old one is gone.
            Some(existing) if existing.uid() != uid => return Ok(()),
            Some(_) => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::drain(format!(
                "timed out waiting for pod {name} to be deleted"
            )));
        }
        tokio::time::sleep(DELETION_CHECK_INTERVAL).await;
    }
}

//! Resource request arithmetic for the capacity-sufficiency check
//!
//! Kubernetes expresses CPU and memory as `Quantity` strings ("250m",
//! "1.5", "512Mi"). The sufficiency rule only ever compares sums, so
//! quantities are flattened to integer millicores and bytes here.
//! Unparseable quantities contribute nothing to a sum.

use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// CPU and memory totals, in millicores and bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceTotals {
    /// CPU in thousandths of a core
    pub cpu_millis: i64,
    /// Memory in bytes
    pub memory_bytes: i64,
}

impl ResourceTotals {
    /// Whether `self` fits entirely within `available`, on both axes.
    pub fn fits_within(&self, available: ResourceTotals) -> bool {
        self.cpu_millis <= available.cpu_millis && self.memory_bytes <= available.memory_bytes
    }
}

impl std::ops::Add for ResourceTotals {
    type Output = ResourceTotals;

    fn add(self, rhs: ResourceTotals) -> ResourceTotals {
        ResourceTotals {
            cpu_millis: self.cpu_millis + rhs.cpu_millis,
            memory_bytes: self.memory_bytes + rhs.memory_bytes,
        }
    }
}

impl std::ops::Sub for ResourceTotals {
    type Output = ResourceTotals;

    fn sub(self, rhs: ResourceTotals) -> ResourceTotals {
        ResourceTotals {
            cpu_millis: self.cpu_millis - rhs.cpu_millis,
            memory_bytes: self.memory_bytes - rhs.memory_bytes,
        }
    }
}

/// Parse a CPU quantity into millicores. Handles plain and fractional core
/// counts plus the `n`/`u`/`m` suffixes.
pub fn parse_cpu_millis(quantity: &Quantity) -> Option<i64> {
    let value = quantity.0.trim();
    let (number, scale) = match value.char_indices().last()? {
        (i, 'n') => (&value[..i], 1e-6),
        (i, 'u') => (&value[..i], 1e-3),
        (i, 'm') => (&value[..i], 1.0),
        _ => (value, 1000.0),
    };
    let number: f64 = number.parse().ok()?;
    Some((number * scale).round() as i64)
}

/// Parse a memory quantity into bytes. Handles plain byte counts, the
/// binary suffixes `Ki`..`Ti` and the decimal suffixes `k`..`T`.
pub fn parse_memory_bytes(quantity: &Quantity) -> Option<i64> {
    let value = quantity.0.trim();
    if let Ok(bytes) = value.parse::<i64>() {
        return Some(bytes);
    }
    let split = value.find(|c: char| c.is_alphabetic())?;
    let number: f64 = value[..split].parse().ok()?;
    let multiplier: i64 = match &value[split..] {
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "k" | "K" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        _ => return None,
    };
    Some((number * multiplier as f64) as i64)
}

/// Sum of a pod's container CPU and memory requests.
pub fn pod_requests(pod: &Pod) -> ResourceTotals {
    let mut totals = ResourceTotals::default();
    let Some(spec) = pod.spec.as_ref() else {
        return totals;
    };
    for container in &spec.containers {
        let Some(requests) = container
            .resources
            .as_ref()
            .and_then(|r| r.requests.as_ref())
        else {
            continue;
        };
        if let Some(cpu) = requests.get("cpu").and_then(parse_cpu_millis) {
            totals.cpu_millis += cpu;
        }
        if let Some(memory) = requests.get("memory").and_then(parse_memory_bytes) {
            totals.memory_bytes += memory;
        }
    }
    totals
}

/// Whether the pod is controlled by a DaemonSet. DaemonSet pods never
/// transfer to another node, so they are excluded from the amount that must
/// fit elsewhere.
pub fn is_daemon_set_pod(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .map(|owners| {
            owners
                .iter()
                .any(|owner| owner.controller == Some(true) && owner.kind == "DaemonSet")
        })
        .unwrap_or(false)
}

/// Whether the pod has run to completion and no longer consumes capacity.
pub fn is_completed_pod(pod: &Pod) -> bool {
    matches!(
        pod.status
            .as_ref()
            .and_then(|status| status.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

/// Requests that would have to move if the node were drained: every pod
/// except DaemonSet-managed and completed ones.
pub fn transferable_requests(pods: &[Pod]) -> ResourceTotals {
    pods.iter()
        .filter(|pod| !is_daemon_set_pod(pod) && !is_completed_pod(pod))
        .map(pod_requests)
        .fold(ResourceTotals::default(), |acc, r| acc + r)
}

/// Requests already bound to a node: every live pod, DaemonSets included,
/// since they consume capacity where they run.
pub fn bound_requests(pods: &[Pod]) -> ResourceTotals {
    pods.iter()
        .filter(|pod| !is_completed_pod(pod))
        .map(pod_requests)
        .fold(ResourceTotals::default(), |acc, r| acc + r)
}

/// A node's allocatable CPU and memory.
pub fn allocatable(node: &Node) -> ResourceTotals {
    let Some(allocatable) = node
        .status
        .as_ref()
        .and_then(|status| status.allocatable.as_ref())
    else {
        return ResourceTotals::default();
    };
    ResourceTotals {
        cpu_millis: allocatable
            .get("cpu")
            .and_then(parse_cpu_millis)
            .unwrap_or_default(),
        memory_bytes: allocatable
            .get("memory")
            .and_then(parse_memory_bytes)
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_node, test_pod};

    fn quantity(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[test]
    fn parses_cpu_quantities() {
        assert_eq!(parse_cpu_millis(&quantity("100m")), Some(100));
        assert_eq!(parse_cpu_millis(&quantity("1")), Some(1000));
        assert_eq!(parse_cpu_millis(&quantity("0.5")), Some(500));
        assert_eq!(parse_cpu_millis(&quantity("2500m")), Some(2500));
        assert_eq!(parse_cpu_millis(&quantity("500000u")), Some(500));
        assert_eq!(parse_cpu_millis(&quantity("")), None);
        assert_eq!(parse_cpu_millis(&quantity("abc")), None);
    }

    #[test]
    fn parses_memory_quantities() {
        assert_eq!(parse_memory_bytes(&quantity("1024")), Some(1024));
        assert_eq!(parse_memory_bytes(&quantity("1Ki")), Some(1024));
        assert_eq!(parse_memory_bytes(&quantity("100Mi")), Some(100 * 1024 * 1024));
        assert_eq!(parse_memory_bytes(&quantity("2Gi")), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory_bytes(&quantity("1k")), Some(1000));
        assert_eq!(parse_memory_bytes(&quantity("1.5Gi")), Some(3 * 512 * 1024 * 1024));
        assert_eq!(parse_memory_bytes(&quantity("1Zi")), None);
    }

    #[test]
    fn sums_pod_container_requests() {
        let pod = test_pod("pod", "node", "250m", "256Mi", false);
        let totals = pod_requests(&pod);
        assert_eq!(totals.cpu_millis, 250);
        assert_eq!(totals.memory_bytes, 256 * 1024 * 1024);
    }

    #[test]
    fn daemon_set_pods_are_excluded_from_transfers_but_bound() {
        let app = test_pod("app", "node", "100m", "100Mi", false);
        let ds = test_pod("ds", "node", "200m", "200Mi", true);
        let pods = vec![app, ds];

        assert_eq!(transferable_requests(&pods).cpu_millis, 100);
        assert_eq!(bound_requests(&pods).cpu_millis, 300);
    }

    #[test]
    fn completed_pods_consume_nothing() {
        let mut pod = test_pod("done", "node", "400m", "400Mi", false);
        pod.status.get_or_insert_with(Default::default).phase = Some("Succeeded".to_string());

        assert_eq!(transferable_requests(std::slice::from_ref(&pod)).cpu_millis, 0);
        assert_eq!(bound_requests(std::slice::from_ref(&pod)).cpu_millis, 0);
    }

    #[test]
    fn reads_node_allocatable() {
        let node = test_node("node", "2", "4Gi");
        let totals = allocatable(&node);
        assert_eq!(totals.cpu_millis, 2000);
        assert_eq!(totals.memory_bytes, 4 * 1024 * 1024 * 1024);
    }

    #[test]
    fn fits_within_requires_both_axes() {
        let needed = ResourceTotals {
            cpu_millis: 500,
            memory_bytes: 500,
        };
        assert!(needed.fits_within(ResourceTotals {
            cpu_millis: 500,
            memory_bytes: 500,
        }));
        assert!(!needed.fits_within(ResourceTotals {
            cpu_millis: 1000,
            memory_bytes: 499,
        }));
        assert!(!needed.fits_within(ResourceTotals {
            cpu_millis: 499,
            memory_bytes: 1000,
        }));
    }
}

//! In-memory fakes and fixtures shared by the unit tests
//!
//! The fakes hold the group/node/pod state behind mutexes and record a call
//! counter per operation, so multi-tick tests can both mutate the world
//! between ticks and assert exactly which calls a tick made.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, Node, NodeCondition, Pod, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::cloud::{
    AutoScalingGroup, CloudProvider, Instance, LaunchTemplate, LaunchTemplateSpec,
};
use crate::cluster::resources::{
    allocatable, bound_requests, is_daemon_set_pod, transferable_requests, ResourceTotals,
};
use crate::cluster::{ClusterClient, HOSTNAME_LABEL};
use crate::{Error, Result};

// =============================================================================
// Fixtures
// =============================================================================

pub(crate) fn test_instance(
    id: &str,
    launch_configuration: &str,
    launch_template: Option<LaunchTemplateSpec>,
    lifecycle_state: &str,
) -> Instance {
    Instance {
        instance_id: id.to_string(),
        lifecycle_state: lifecycle_state.to_string(),
        launch_configuration_name: (!launch_configuration.is_empty())
            .then(|| launch_configuration.to_string()),
        launch_template,
    }
}

pub(crate) fn test_group(
    name: &str,
    launch_configuration: &str,
    launch_template: Option<LaunchTemplateSpec>,
    instances: Vec<Instance>,
    desired_capacity: i32,
    max_size: i32,
) -> AutoScalingGroup {
    AutoScalingGroup {
        name: name.to_string(),
        desired_capacity,
        max_size,
        instances,
        launch_configuration_name: (!launch_configuration.is_empty())
            .then(|| launch_configuration.to_string()),
        launch_template,
        mixed_instances_launch_template: None,
    }
}

/// A schedulable node whose hostname label equals its name, with the given
/// allocatable CPU and memory and a Ready=True kubelet condition.
pub(crate) fn test_node(name: &str, cpu: &str, memory: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                [(HOSTNAME_LABEL.to_string(), name.to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Some(Default::default()),
        status: Some(k8s_openapi::api::core::v1::NodeStatus {
            allocatable: Some(
                [
                    ("cpu".to_string(), Quantity(cpu.to_string())),
                    ("memory".to_string(), Quantity(memory.to_string())),
                ]
                .into_iter()
                .collect(),
            ),
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

pub(crate) fn test_pod(
    name: &str,
    node_name: &str,
    cpu: &str,
    memory: &str,
    daemon_set: bool,
) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            owner_references: daemon_set.then(|| {
                vec![OwnerReference {
                    api_version: "apps/v1".to_string(),
                    kind: "DaemonSet".to_string(),
                    name: format!("{name}-owner"),
                    controller: Some(true),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        },
        spec: Some(k8s_openapi::api::core::v1::PodSpec {
            node_name: Some(node_name.to_string()),
            containers: vec![Container {
                name: "app".to_string(),
                resources: Some(ResourceRequirements {
                    requests: Some(
                        [
                            ("cpu".to_string(), Quantity(cpu.to_string())),
                            ("memory".to_string(), Quantity(memory.to_string())),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: None,
    }
}

// =============================================================================
// Fake cloud provider
// =============================================================================

pub(crate) struct FakeCloudProvider {
    groups: Mutex<Vec<AutoScalingGroup>>,
    templates: Mutex<Vec<LaunchTemplate>>,
    counters: Mutex<HashMap<String, usize>>,
    terminated: Mutex<Vec<String>>,
}

impl FakeCloudProvider {
    pub fn new(groups: Vec<AutoScalingGroup>) -> Self {
        Self {
            groups: Mutex::new(groups),
            templates: Mutex::new(Vec::new()),
            counters: Mutex::new(HashMap::new()),
            terminated: Mutex::new(Vec::new()),
        }
    }

    pub fn with_templates(self, templates: Vec<LaunchTemplate>) -> Self {
        *self.templates.lock().unwrap() = templates;
        self
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.counters
            .lock()
            .unwrap()
            .get(operation)
            .copied()
            .unwrap_or_default()
    }

    pub fn group(&self, name: &str) -> AutoScalingGroup {
        self.groups
            .lock()
            .unwrap()
            .iter()
            .find(|group| group.name == name)
            .cloned()
            .expect("group should exist")
    }

    pub fn push_instance(&self, group_name: &str, instance: Instance) {
        let mut groups = self.groups.lock().unwrap();
        let group = groups
            .iter_mut()
            .find(|group| group.name == group_name)
            .expect("group should exist");
        group.instances.push(instance);
    }

    pub fn set_lifecycle_state(&self, group_name: &str, instance_id: &str, state: &str) {
        let mut groups = self.groups.lock().unwrap();
        let instance = groups
            .iter_mut()
            .find(|group| group.name == group_name)
            .expect("group should exist")
            .instances
            .iter_mut()
            .find(|instance| instance.instance_id == instance_id)
            .expect("instance should exist");
        instance.lifecycle_state = state.to_string();
    }

    pub fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }

    fn record(&self, operation: &str) {
        *self
            .counters
            .lock()
            .unwrap()
            .entry(operation.to_string())
            .or_default() += 1;
    }
}

#[async_trait]
impl CloudProvider for FakeCloudProvider {
    async fn describe_auto_scaling_groups(
        &self,
        names: &[String],
    ) -> Result<Vec<AutoScalingGroup>> {
        self.record("DescribeAutoScalingGroups");
        Ok(self
            .groups
            .lock()
            .unwrap()
            .iter()
            .filter(|group| names.contains(&group.name))
            .cloned()
            .collect())
    }

    async fn describe_launch_template_by_id(&self, id: &str) -> Result<Option<LaunchTemplate>> {
        self.record("DescribeLaunchTemplate");
        Ok(self
            .templates
            .lock()
            .unwrap()
            .iter()
            .find(|template| template.id == id)
            .cloned())
    }

    async fn describe_launch_template_by_name(
        &self,
        name: &str,
    ) -> Result<Option<LaunchTemplate>> {
        self.record("DescribeLaunchTemplate");
        Ok(self
            .templates
            .lock()
            .unwrap()
            .iter()
            .find(|template| template.name == name)
            .cloned())
    }

    async fn set_desired_capacity(&self, group: &AutoScalingGroup, desired: i32) -> Result<()> {
        self.record("SetDesiredCapacity");
        let mut groups = self.groups.lock().unwrap();
        let stored = groups
            .iter_mut()
            .find(|stored| stored.name == group.name)
            .ok_or_else(|| Error::cloud(format!("no such group: {}", group.name)))?;
        stored.desired_capacity = desired;
        Ok(())
    }

    async fn terminate_instance(&self, instance: &Instance) -> Result<()> {
        self.record("TerminateInstance");
        self.terminated
            .lock()
            .unwrap()
            .push(instance.instance_id.clone());
        Ok(())
    }
}

// =============================================================================
// Fake cluster client
// =============================================================================

pub(crate) struct FakeClusterClient {
    nodes: Mutex<HashMap<String, Node>>,
    pods: Mutex<Vec<Pod>>,
    counters: Mutex<HashMap<String, usize>>,
    drain_failure: Mutex<Option<String>>,
}

impl FakeClusterClient {
    pub fn new(nodes: Vec<Node>, pods: Vec<Pod>) -> Self {
        Self {
            nodes: Mutex::new(
                nodes
                    .into_iter()
                    .map(|node| (node.name_any(), node))
                    .collect(),
            ),
            pods: Mutex::new(pods),
            counters: Mutex::new(HashMap::new()),
            drain_failure: Mutex::new(None),
        }
    }

    pub fn add_node(&self, node: Node) {
        self.nodes.lock().unwrap().insert(node.name_any(), node);
    }

    pub fn node(&self, name: &str) -> Option<Node> {
        self.nodes.lock().unwrap().get(name).cloned()
    }

    pub fn set_node_ready(&self, name: &str, ready: bool) {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(name).expect("node should exist");
        node.status.get_or_insert_with(Default::default).conditions = Some(vec![NodeCondition {
            type_: "Ready".to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
            ..Default::default()
        }]);
    }

    /// Make every subsequent drain fail with the given message.
    pub fn fail_drains(&self, message: &str) {
        *self.drain_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Let drains succeed again.
    pub fn allow_drains(&self) {
        *self.drain_failure.lock().unwrap() = None;
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.counters
            .lock()
            .unwrap()
            .get(operation)
            .copied()
            .unwrap_or_default()
    }

    fn record(&self, operation: &str) {
        *self
            .counters
            .lock()
            .unwrap()
            .entry(operation.to_string())
            .or_default() += 1;
    }

    fn pods_on(&self, node_name: &str) -> Vec<Pod> {
        self.pods
            .lock()
            .unwrap()
            .iter()
            .filter(|pod| {
                pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref()) == Some(node_name)
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn get_node_by_hostname(&self, instance_id: &str) -> Result<Node> {
        self.record("GetNodeByHostName");
        self.node(instance_id)
            .ok_or_else(|| Error::NodeNotFound(instance_id.to_string()))
    }

    async fn update_node(&self, node: &Node) -> Result<()> {
        self.record("UpdateNode");
        self.add_node(node.clone());
        Ok(())
    }

    async fn annotate_node_by_hostname(
        &self,
        instance_id: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.record("AnnotateNode");
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes
            .get_mut(instance_id)
            .ok_or_else(|| Error::NodeNotFound(instance_id.to_string()))?;
        node.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn drain(
        &self,
        node_name: &str,
        _ignore_daemon_sets: bool,
        _delete_local_data: bool,
    ) -> Result<()> {
        self.record("Drain");
        if let Some(message) = self.drain_failure.lock().unwrap().clone() {
            return Err(Error::drain(message));
        }
        // Evictions: everything except DaemonSet-managed pods leaves the node.
        self.pods.lock().unwrap().retain(|pod| {
            pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref()) != Some(node_name)
                || is_daemon_set_pod(pod)
        });
        Ok(())
    }

    async fn has_enough_resources_to_transfer(
        &self,
        source: &Node,
        candidates: &[Node],
    ) -> Result<bool> {
        self.record("CheckEnoughResources");
        let needed = transferable_requests(&self.pods_on(&source.name_any()));
        let mut spare = ResourceTotals::default();
        for candidate in candidates {
            let bound = bound_requests(&self.pods_on(&candidate.name_any()));
            spare = spare + (allocatable(candidate) - bound);
        }
        Ok(needed.fits_within(spare))
    }
}

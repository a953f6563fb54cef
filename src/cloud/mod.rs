//! Cloud adapter: auto-scaling groups and launch templates
//!
//! The reconciliation engine only sees the domain model defined here plus
//! the [`CloudProvider`] trait; the AWS SDK stays behind [`AwsCloudProvider`].
//! Tests substitute an in-memory fake that records call counters.

mod aws;

pub use aws::AwsCloudProvider;

use async_trait::async_trait;

use crate::Result;

/// Lifecycle state of an instance that is in service and schedulable.
pub const LIFECYCLE_STATE_IN_SERVICE: &str = "InService";

/// An auto-scaling group as observed at the start of a tick.
#[derive(Clone, Debug, Default)]
pub struct AutoScalingGroup {
    /// Group name, unique within the region
    pub name: String,
    /// Capacity the group is currently converging towards
    pub desired_capacity: i32,
    /// Upper bound the group will not scale beyond on its own
    pub max_size: i32,
    /// Member instances, in the order the cloud returned them
    pub instances: Vec<Instance>,
    /// Target launch configuration, when the group uses one
    pub launch_configuration_name: Option<String>,
    /// Target launch template, when the group uses one directly
    pub launch_template: Option<LaunchTemplateSpec>,
    /// Target launch template carried by a mixed-instances policy
    pub mixed_instances_launch_template: Option<LaunchTemplateSpec>,
}

impl AutoScalingGroup {
    /// The launch template the group materializes new instances from,
    /// whether referenced directly or through a mixed-instances policy.
    pub fn target_launch_template(&self) -> Option<&LaunchTemplateSpec> {
        self.launch_template
            .as_ref()
            .or(self.mixed_instances_launch_template.as_ref())
    }
}

/// A single ASG member instance.
#[derive(Clone, Debug, Default)]
pub struct Instance {
    /// EC2 instance id; also the node's `kubernetes.io/hostname` label
    pub instance_id: String,
    /// Lifecycle state as reported by the group (`InService`, `Pending`, ...)
    pub lifecycle_state: String,
    /// Launch configuration the instance was created from, if any
    pub launch_configuration_name: Option<String>,
    /// Launch template reference the instance was created from, if any
    pub launch_template: Option<LaunchTemplateSpec>,
}

/// Reference to a launch template, possibly with a symbolic version.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LaunchTemplateSpec {
    /// Template id (`lt-...`)
    pub id: Option<String>,
    /// Template name
    pub name: Option<String>,
    /// Version: a number, `$Latest`, or `$Default`
    pub version: Option<String>,
}

/// A described launch template, used to resolve symbolic versions.
#[derive(Clone, Debug, Default)]
pub struct LaunchTemplate {
    /// Template id
    pub id: String,
    /// Template name
    pub name: String,
    /// Version `$Latest` resolves to
    pub latest_version: i64,
    /// Version `$Default` resolves to
    pub default_version: i64,
}

/// Outbound cloud operations the engine needs.
///
/// Termination goes through the auto-scaling API rather than a direct EC2
/// terminate so the group's accounting stays consistent.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Describe the named auto-scaling groups.
    async fn describe_auto_scaling_groups(&self, names: &[String])
        -> Result<Vec<AutoScalingGroup>>;

    /// Describe a launch template by id. Returns `None` when it does not exist.
    async fn describe_launch_template_by_id(&self, id: &str) -> Result<Option<LaunchTemplate>>;

    /// Describe a launch template by name. Returns `None` when it does not exist.
    async fn describe_launch_template_by_name(&self, name: &str)
        -> Result<Option<LaunchTemplate>>;

    /// Set the group's desired capacity.
    async fn set_desired_capacity(&self, group: &AutoScalingGroup, desired: i32) -> Result<()>;

    /// Request termination of an instance through its auto-scaling group,
    /// decrementing the desired capacity with it.
    async fn terminate_instance(&self, instance: &Instance) -> Result<()>;
}

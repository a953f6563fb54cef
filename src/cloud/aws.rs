//! AWS implementation of the cloud adapter
//!
//! Thin mapping layer between the AWS SDK types and the domain model in
//! [`crate::cloud`]. All errors are flattened into [`Error::Cloud`] with the
//! failing operation named; the engine treats them as per-ASG or
//! per-instance skips.

use async_trait::async_trait;
use aws_sdk_autoscaling::error::DisplayErrorContext;
use aws_sdk_autoscaling::types as asg;
use aws_sdk_ec2::types as ec2;
use tracing::debug;

use super::{AutoScalingGroup, CloudProvider, Instance, LaunchTemplate, LaunchTemplateSpec};
use crate::{Error, Result};

/// Cloud adapter backed by the AWS AutoScaling and EC2 APIs.
#[derive(Clone)]
pub struct AwsCloudProvider {
    autoscaling: aws_sdk_autoscaling::Client,
    ec2: aws_sdk_ec2::Client,
}

impl AwsCloudProvider {
    /// Create a provider from a shared SDK configuration.
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            autoscaling: aws_sdk_autoscaling::Client::new(sdk_config),
            ec2: aws_sdk_ec2::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl CloudProvider for AwsCloudProvider {
    async fn describe_auto_scaling_groups(
        &self,
        names: &[String],
    ) -> Result<Vec<AutoScalingGroup>> {
        let mut groups = Vec::new();
        let mut next_token = None;
        loop {
            let output = self
                .autoscaling
                .describe_auto_scaling_groups()
                .set_auto_scaling_group_names(Some(names.to_vec()))
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| {
                    Error::cloud(format!(
                        "describing auto-scaling groups: {}",
                        DisplayErrorContext(&e)
                    ))
                })?;
            groups.extend(output.auto_scaling_groups().iter().map(group_from_sdk));
            next_token = output.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }
        debug!(count = groups.len(), "described auto-scaling groups");
        Ok(groups)
    }

    async fn describe_launch_template_by_id(&self, id: &str) -> Result<Option<LaunchTemplate>> {
        let output = self
            .ec2
            .describe_launch_templates()
            .launch_template_ids(id)
            .send()
            .await
            .map_err(|e| {
                Error::cloud(format!(
                    "describing launch template {id}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(output.launch_templates().first().map(template_from_sdk))
    }

    async fn describe_launch_template_by_name(
        &self,
        name: &str,
    ) -> Result<Option<LaunchTemplate>> {
        let output = self
            .ec2
            .describe_launch_templates()
            .launch_template_names(name)
            .send()
            .await
            .map_err(|e| {
                Error::cloud(format!(
                    "describing launch template named {name}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(output.launch_templates().first().map(template_from_sdk))
    }

    async fn set_desired_capacity(&self, group: &AutoScalingGroup, desired: i32) -> Result<()> {
        self.autoscaling
            .set_desired_capacity()
            .auto_scaling_group_name(&group.name)
            .desired_capacity(desired)
            .send()
            .await
            .map_err(|e| {
                Error::cloud(format!(
                    "setting desired capacity of {} to {desired}: {}",
                    group.name,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }

    async fn terminate_instance(&self, instance: &Instance) -> Result<()> {
        // Terminating through the group (with the decrement) keeps the
        // group's capacity accounting consistent; a VM-level terminate would
        // race the group into replacing the instance we just removed.
        self.autoscaling
            .terminate_instance_in_auto_scaling_group()
            .instance_id(&instance.instance_id)
            .should_decrement_desired_capacity(true)
            .send()
            .await
            .map_err(|e| {
                Error::cloud(format!(
                    "terminating instance {}: {}",
                    instance.instance_id,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}

fn group_from_sdk(group: &asg::AutoScalingGroup) -> AutoScalingGroup {
    AutoScalingGroup {
        name: group.auto_scaling_group_name().unwrap_or_default().to_string(),
        desired_capacity: group.desired_capacity().unwrap_or_default(),
        max_size: group.max_size().unwrap_or_default(),
        instances: group.instances().iter().map(instance_from_sdk).collect(),
        launch_configuration_name: group.launch_configuration_name().map(str::to_string),
        launch_template: group.launch_template().map(spec_from_sdk),
        mixed_instances_launch_template: group
            .mixed_instances_policy()
            .and_then(|policy| policy.launch_template())
            .and_then(|lt| lt.launch_template_specification())
            .map(spec_from_sdk),
    }
}

fn instance_from_sdk(instance: &asg::Instance) -> Instance {
    Instance {
        instance_id: instance.instance_id().unwrap_or_default().to_string(),
        lifecycle_state: instance
            .lifecycle_state()
            .map(|state| state.as_str().to_string())
            .unwrap_or_default(),
        launch_configuration_name: instance.launch_configuration_name().map(str::to_string),
        launch_template: instance.launch_template().map(spec_from_sdk),
    }
}

fn spec_from_sdk(spec: &asg::LaunchTemplateSpecification) -> LaunchTemplateSpec {
    LaunchTemplateSpec {
        id: spec.launch_template_id().map(str::to_string),
        name: spec.launch_template_name().map(str::to_string),
        version: spec.version().map(str::to_string),
    }
}

fn template_from_sdk(template: &ec2::LaunchTemplate) -> LaunchTemplate {
    LaunchTemplate {
        id: template.launch_template_id().unwrap_or_default().to_string(),
        name: template.launch_template_name().unwrap_or_default().to_string(),
        latest_version: template.latest_version_number().unwrap_or_default(),
        default_version: template.default_version_number().unwrap_or_default(),
    }
}

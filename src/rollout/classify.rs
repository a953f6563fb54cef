//! Drift classification
//!
//! Partitions a group's instances into outdated and updated by comparing
//! each instance's launch reference against the group's current target.
//! Launch templates need one describe call per group to resolve the
//! `$Latest` and `$Default` version tokens before comparison.

use tracing::debug;

use crate::cloud::{
    AutoScalingGroup, CloudProvider, Instance, LaunchTemplate, LaunchTemplateSpec,
};
use crate::{Error, Result};

/// A group's instances, partitioned by launch-spec drift.
#[derive(Clone, Debug, Default)]
pub struct Classification {
    /// Instances whose launch reference no longer matches the target
    pub outdated: Vec<Instance>,
    /// Instances created from the current target
    pub updated: Vec<Instance>,
}

/// Classify the group's instances against its current launch spec.
///
/// Fails when the group has neither a launch template nor a launch
/// configuration, or when the target template cannot be described; the
/// caller skips the group for this tick.
pub async fn classify_instances(
    cloud: &dyn CloudProvider,
    group: &AutoScalingGroup,
) -> Result<Classification> {
    if let Some(target) = group.target_launch_template() {
        if group.launch_template.is_none() {
            debug!(group = %group.name, "using launch template from mixed-instances policy");
        }
        let template = fetch_target_template(cloud, target).await?;
        Ok(classify_by_launch_template(target, &template, &group.instances))
    } else if let Some(target) = group.launch_configuration_name.as_deref() {
        Ok(classify_by_launch_configuration(target, &group.instances))
    } else {
        Err(Error::classification(format!(
            "group {} has neither a launch template nor a launch configuration",
            group.name
        )))
    }
}

async fn fetch_target_template(
    cloud: &dyn CloudProvider,
    target: &LaunchTemplateSpec,
) -> Result<LaunchTemplate> {
    let described = match (target.id.as_deref(), target.name.as_deref()) {
        (Some(id), _) if !id.is_empty() => cloud.describe_launch_template_by_id(id).await?,
        (_, Some(name)) if !name.is_empty() => {
            cloud.describe_launch_template_by_name(name).await?
        }
        _ => {
            return Err(Error::classification(
                "launch template reference carries neither an id nor a name",
            ))
        }
    };
    described.ok_or_else(|| {
        Error::classification(format!(
            "launch template {} not found",
            target.id.as_deref().or(target.name.as_deref()).unwrap_or("?")
        ))
    })
}

/// An instance is updated iff its own template reference matches the target
/// on id, name and resolved version.
fn classify_by_launch_template(
    target: &LaunchTemplateSpec,
    template: &LaunchTemplate,
    instances: &[Instance],
) -> Classification {
    let mut classification = Classification::default();
    for instance in instances {
        let updated = instance.launch_template.as_ref().is_some_and(|reference| {
            reference.id.as_deref().unwrap_or_default() == target.id.as_deref().unwrap_or_default()
                && reference.name.as_deref().unwrap_or_default()
                    == target.name.as_deref().unwrap_or_default()
                && versions_match(template, target.version.as_deref(), reference.version.as_deref())
        });
        if updated {
            classification.updated.push(instance.clone());
        } else {
            classification.outdated.push(instance.clone());
        }
    }
    classification
}

/// An instance is updated iff it was created from the target configuration.
fn classify_by_launch_configuration(target: &str, instances: &[Instance]) -> Classification {
    let mut classification = Classification::default();
    for instance in instances {
        if instance.launch_configuration_name.as_deref() == Some(target) {
            classification.updated.push(instance.clone());
        } else {
            classification.outdated.push(instance.clone());
        }
    }
    classification
}

/// Compare two template versions after substituting the symbolic tokens with
/// the template's actual version numbers. Two absent versions are equal; an
/// absent version never equals a present one.
fn versions_match(template: &LaunchTemplate, a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => resolve_version(template, a) == resolve_version(template, b),
        _ => false,
    }
}

fn resolve_version(template: &LaunchTemplate, version: &str) -> String {
    match version {
        "$Latest" => template.latest_version.to_string(),
        "$Default" => template.default_version.to_string(),
        concrete => concrete.to_string(),
    }
}

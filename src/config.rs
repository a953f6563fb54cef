//! Environment-driven configuration
//!
//! All settings come from environment variables so the controller can run as
//! a plain in-cluster deployment with no flags. The parsed value is threaded
//! explicitly through constructors; there is no process-global config.

use clap::{ArgAction, Parser};

/// Runtime configuration, sourced from the environment.
#[derive(Parser, Clone, Debug)]
#[command(name = "asg-roller", version, about, long_about = None)]
pub struct Config {
    /// Comma-separated names of the auto-scaling groups to reconcile
    #[arg(
        long,
        env = "AUTO_SCALING_GROUP_NAMES",
        value_delimiter = ',',
        required = true
    )]
    pub auto_scaling_group_names: Vec<String>,

    /// AWS region the groups live in
    #[arg(long, env = "AWS_REGION", default_value = "us-west-2")]
    pub aws_region: String,

    /// Deployment environment; `dev` selects the user's kubeconfig instead
    /// of in-cluster credentials
    #[arg(long, env = "ENVIRONMENT", default_value = "")]
    pub environment: String,

    /// Enable verbose per-tick logging
    #[arg(long, env = "DEBUG", action = ArgAction::Set, default_value_t = false)]
    pub debug: bool,

    /// Skip DaemonSet-managed pods when draining
    #[arg(long, env = "IGNORE_DAEMON_SETS", action = ArgAction::Set, default_value_t = true)]
    pub ignore_daemon_sets: bool,

    /// Evict pods using emptyDir volumes when draining
    #[arg(long, env = "DELETE_LOCAL_DATA", action = ArgAction::Set, default_value_t = true)]
    pub delete_local_data: bool,

    /// Reserved: permit raising a group's MaxSize during rollout. Parsed but
    /// not consulted yet; the engine currently increments DesiredCapacity
    /// without enforcing MaxSize.
    #[arg(
        long,
        env = "CAN_INCREASE_AUTO_SCALING_GROUP_MAX",
        action = ArgAction::Set,
        default_value_t = false
    )]
    pub can_increase_auto_scaling_group_max: bool,
}

impl Config {
    /// Parse configuration from the process environment, exiting with a
    /// usage message when required settings are missing.
    pub fn from_env() -> Self {
        let mut config = Self::parse();
        config.normalize();
        config
    }

    /// Whether the controller runs against the user's kubeconfig rather than
    /// in-cluster credentials.
    pub fn is_dev(&self) -> bool {
        self.environment == "dev"
    }

    fn normalize(&mut self) {
        self.environment = self.environment.trim().to_ascii_lowercase();
        self.auto_scaling_group_names = self
            .auto_scaling_group_names
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
    }
}

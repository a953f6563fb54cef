//! asg-roller - rolling update handler for ASG-backed worker pools

use std::sync::Arc;

use anyhow::Context as _;
use aws_config::{BehaviorVersion, Region};
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use asg_roller::cloud::{AwsCloudProvider, CloudProvider};
use asg_roller::cluster::KubeClusterClient;
use asg_roller::config::Config;
use asg_roller::rollout::{RollingUpdateHandler, RolloutOptions};
use asg_roller::TICK_INTERVAL;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    // RUST_LOG wins when set; otherwise DEBUG=true turns on per-tick detail.
    let default_filter = if config.debug { "asg_roller=debug,info" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    info!(
        groups = ?config.auto_scaling_group_names,
        region = %config.aws_region,
        "starting rolling update handler"
    );

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.aws_region.clone()))
        .load()
        .await;
    let cloud: Arc<dyn CloudProvider> = Arc::new(AwsCloudProvider::new(&sdk_config));

    let kube_client = build_kube_client(&config).await?;
    let cluster = Arc::new(KubeClusterClient::new(kube_client));

    let handler = RollingUpdateHandler::new(
        cloud.clone(),
        cluster,
        RolloutOptions {
            ignore_daemon_sets: config.ignore_daemon_sets,
            delete_local_data: config.delete_local_data,
        },
    );

    loop {
        debug!("starting tick");
        match cloud
            .describe_auto_scaling_groups(&config.auto_scaling_group_names)
            .await
        {
            Ok(groups) => handler.run(&groups).await,
            Err(error) => error!(%error, "unable to describe auto-scaling groups"),
        }
        debug!(seconds = TICK_INTERVAL.as_secs(), "tick complete, sleeping");
        tokio::time::sleep(TICK_INTERVAL).await;
    }
}

/// Build the Kubernetes client: the user's kubeconfig in dev, the service
/// account credentials everywhere else.
async fn build_kube_client(config: &Config) -> anyhow::Result<kube::Client> {
    let kube_config = if config.is_dev() {
        kube::Config::from_kubeconfig(&kube::config::KubeConfigOptions::default())
            .await
            .context("loading kubeconfig")?
    } else {
        kube::Config::incluster().context("loading in-cluster configuration")?
    };
    kube::Client::try_from(kube_config).context("creating Kubernetes client")
}

//! SR-IOV FEC Node Daemon
//!
//! Runs on every accelerator node. Applies this node's `SriovFecNodeConfig`
//! and `SriovVrbNodeConfig` to the hardware: validates the kernel
//! environment, drains the node when asked, rebinds PFs, starts
//! pf_bb_config and creates VFs, then reports the result in the status.

mod config;
mod configurator;
mod controller;
mod drain;
mod error;
mod lease;
mod process;
mod reconciler;
mod tailer;
mod validation;
mod watcher;

use crate::config::Config;
use crate::controller::Controller;
use crate::error::DaemonError;
use operator_common::cancel_on_signal;
use sriov_host::HostPaths;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube client TLS uses ring
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting SR-IOV FEC daemon");

    let config = Config::from_env()?;
    let paths = HostPaths::with_host_root(&config.host_root);
    let config = config.with_vfio_token_file(&paths.vfio_token());

    info!("Configuration:");
    info!("  Node: {}", config.node_name);
    info!("  Namespace: {}", config.namespace);
    info!("  Families: {:?}", config.families);
    info!("  Drain timeout: {:?}", config.drain_timeout);
    info!("  Lease duration: {:?}", config.lease_duration);
    info!("  Metric gather interval: {:?}", config.metric_gather_interval);
    info!("  Resync: {:?}", config.resync);
    info!("  Host root: {}", config.host_root.display());
    info!("  Generic Kubernetes: {}", config.generic_k8s);

    let token = CancellationToken::new();
    cancel_on_signal(token.clone())?;

    let controller = Controller::new(&config, paths, token.clone()).await?;
    controller.run(token.cancelled_owned()).await?;

    Ok(())
}

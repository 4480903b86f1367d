//! SR-IOV FEC Operator
//!
//! Distributes `SriovFecClusterConfig` and `SriovVrbClusterConfig` policy to
//! per-node configs and validates both kinds on admission.

mod config;
mod controller;
mod error;
mod matcher;
mod reconciler;
mod watcher;
mod webhook;

use crate::config::Config;
use crate::controller::Controller;
use crate::error::ControllerError;
use operator_common::cancel_on_signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Webhook TLS uses ring
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting SR-IOV FEC operator");

    let config = Config::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace);
    info!("  Webhooks: {}", if config.enable_webhooks { "enabled" } else { "disabled" });
    info!("  Generic Kubernetes: {}", config.generic_k8s);

    let token = CancellationToken::new();
    cancel_on_signal(token.clone())?;

    let controller = Controller::new(&config, token.clone()).await?;
    controller.run(token.cancelled_owned()).await?;

    Ok(())
}

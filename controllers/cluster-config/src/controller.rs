//! Main controller implementation.
//!
//! Runs the FEC and VRB matchers, the admission webhook and the health
//! probes as background tasks until a shutdown signal arrives or any of
//! them exits.

use crate::config::Config;
use crate::error::ControllerError;
use crate::watcher::Watcher;
use crate::webhook::serve_webhook;
use crds::{Fec, Vrb};
use kube::Client;
use operator_common::{Readiness, serve_probes};
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Main controller for cluster config distribution.
pub struct Controller {
    fec_watcher: JoinHandle<()>,
    vrb_watcher: JoinHandle<()>,
    webhook: Option<JoinHandle<Result<(), ControllerError>>>,
    probes: JoinHandle<std::io::Result<()>>,
    token: CancellationToken,
}

async fn join_optional<T>(handle: Option<&mut JoinHandle<T>>) -> Result<T, tokio::task::JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: &Config, token: CancellationToken) -> Result<Self, ControllerError> {
        info!("Initializing SR-IOV FEC operator");

        let client = Client::try_default().await?;

        let fec_watcher = {
            let watcher = Watcher::<Fec>::new(client.clone(), &config.namespace);
            tokio::spawn(watcher.run(token.clone()))
        };
        let vrb_watcher = {
            let watcher = Watcher::<Vrb>::new(client, &config.namespace);
            tokio::spawn(watcher.run(token.clone()))
        };

        let webhook = if config.enable_webhooks {
            let cert_dir = config.webhook_cert_dir.clone();
            let port = config.webhook_port;
            let token = token.clone();
            Some(tokio::spawn(async move { serve_webhook(port, &cert_dir, token).await }))
        } else {
            info!("Admission webhooks disabled");
            None
        };

        let readiness = Readiness::new();
        let probes = tokio::spawn(serve_probes(config.probe_port, readiness.clone(), token.clone()));
        readiness.set_ready();

        Ok(Self {
            fec_watcher,
            vrb_watcher,
            webhook,
            probes,
            token,
        })
    }

    /// Runs the controller until `shutdown` resolves or a task exits.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<(), ControllerError> {
        info!("SR-IOV FEC operator running");

        let result = tokio::select! {
            _ = shutdown => Ok(()),
            result = &mut self.fec_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("FEC watcher panicked: {}", e)))
            }
            result = &mut self.vrb_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("VRB watcher panicked: {}", e)))
            }
            result = join_optional(self.webhook.as_mut()) => {
                result
                    .map_err(|e| ControllerError::Watch(format!("Webhook server panicked: {}", e)))
                    .and_then(|served| served)
            }
            result = &mut self.probes => {
                result
                    .map_err(|e| ControllerError::Watch(format!("Probe server panicked: {}", e)))
                    .and_then(|served| served.map_err(ControllerError::from))
            }
        };

        info!("Shutting down");
        self.token.cancel();
        for watcher in [self.fec_watcher, self.vrb_watcher] {
            if !watcher.is_finished() {
                let _ = watcher.await;
            }
        }
        result
    }
}

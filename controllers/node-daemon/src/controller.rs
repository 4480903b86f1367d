//! Daemon controller.
//!
//! Wires one NodeConfig loop per configured family to a shared configurator
//! and drain coordinator, serves health probes, and releases the drain lease
//! on the way out.

use crate::config::Config;
use crate::configurator::Configurator;
use crate::drain::{DrainCoordinator, KubeNodeOps};
use crate::error::DaemonError;
use crate::lease::{LeaderLock, LeaseLock, LeaseTiming};
use crate::reconciler::NodeReconciler;
use crate::tailer::TailerRegistry;
use crate::watcher::Watcher;
use crds::{AcceleratorFamily, Family, Fec, Vrb};
use kube::{Api, Client};
use operator_common::{Readiness, serve_probes};
use sriov_host::{AcceleratorDiscoveryConfig, HostPaths, Sysfs, SystemCommandRunner};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything the family loops share
struct Shared<'a> {
    client: Client,
    config: &'a Config,
    paths: &'a HostPaths,
    configurator: Configurator,
    drain: Arc<DrainCoordinator>,
    token: CancellationToken,
}

impl Shared<'_> {
    /// Load the family's discovery table and start its loop
    ///
    /// A missing or malformed discovery table is fatal.
    fn spawn_watcher<F: AcceleratorFamily>(&self) -> Result<JoinHandle<()>, DaemonError> {
        let path = self
            .paths
            .accelerator_discovery(AcceleratorDiscoveryConfig::file_name(F::FAMILY));
        let discovery = AcceleratorDiscoveryConfig::load(&path)?;
        info!(family = %F::FAMILY, config = %path.display(), "Loaded accelerator discovery config");

        let api: Api<F::NodeConfig> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let reconciler = NodeReconciler::<F>::new(
            api.clone(),
            &self.config.node_name,
            &self.config.namespace,
            discovery,
            self.configurator.clone(),
            self.drain.clone(),
            self.token.clone(),
        );
        let watcher = Watcher::new(reconciler, api, &self.config.node_name, self.config.resync);
        Ok(tokio::spawn(watcher.run(self.token.clone())))
    }
}

/// Node daemon for accelerator configuration.
pub struct Controller {
    watchers: Vec<(Family, JoinHandle<()>)>,
    probes: JoinHandle<std::io::Result<()>>,
    lease: Arc<LeaseLock>,
    token: CancellationToken,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: &Config, paths: HostPaths, token: CancellationToken) -> Result<Self, DaemonError> {
        info!(node = %config.node_name, "Initializing SR-IOV FEC daemon");

        let client = Client::try_default().await?;

        let timing = LeaseTiming::detect(client.clone(), config.lease_duration).await?;
        let lease = Arc::new(LeaseLock::new(client.clone(), &config.namespace, &config.node_name, timing));
        let node_ops = Arc::new(KubeNodeOps::new(client.clone(), &config.node_name, config.drain_timeout));
        let drain = Arc::new(DrainCoordinator::new(lease.clone(), node_ops));

        let configurator = Configurator::new(
            Sysfs::new(paths.clone()),
            Arc::new(SystemCommandRunner),
            config.vfio_token.clone(),
            TailerRegistry::new(),
            token.clone(),
        );

        let shared = Shared {
            client,
            config,
            paths: &paths,
            configurator,
            drain,
            token: token.clone(),
        };
        let mut watchers = Vec::new();
        for family in &config.families {
            let handle = match family {
                Family::Fec => shared.spawn_watcher::<Fec>(),
                Family::Vrb => shared.spawn_watcher::<Vrb>(),
            };
            match handle {
                Ok(handle) => watchers.push((*family, handle)),
                Err(e) => {
                    token.cancel();
                    return Err(e);
                }
            }
        }

        let readiness = Readiness::new();
        let probes = tokio::spawn(serve_probes(config.probe_port, readiness.clone(), token.clone()));
        readiness.set_ready();

        Ok(Self {
            watchers,
            probes,
            lease,
            token,
        })
    }

    /// Runs the daemon until `shutdown` resolves or a task exits.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<(), DaemonError> {
        info!("SR-IOV FEC daemon running");

        let families: Vec<Family> = self.watchers.iter().map(|(family, _)| *family).collect();
        let watchers = futures::future::select_all(self.watchers.iter_mut().map(|(_, handle)| handle));
        let result = tokio::select! {
            _ = shutdown => Ok(()),
            (result, index, _) = watchers => {
                let family = families[index];
                match result {
                    Ok(()) => Err(DaemonError::Watch(format!("{family} watcher exited"))),
                    Err(e) => Err(DaemonError::Watch(format!("{family} watcher panicked: {e}"))),
                }
            }
            result = &mut self.probes => {
                result
                    .map_err(|e| DaemonError::Watch(format!("Probe server panicked: {}", e)))
                    .and_then(|served| served.map_err(DaemonError::from))
            }
        };

        info!("Shutting down");
        self.token.cancel();
        for (_, watcher) in self.watchers {
            if !watcher.is_finished() {
                let _ = watcher.await;
            }
        }
        if let Err(e) = self.lease.release().await {
            warn!("Failed to release lease on shutdown: {}", e);
        }
        result
    }
}

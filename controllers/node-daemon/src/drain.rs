//! Drain coordination
//!
//! Reconfiguring an accelerator pulls VFs out from under running workloads.
//! Unless a spec opts out with `drainSkip`, the node is cordoned and drained
//! first, under a cluster-wide lease so only one node is out at a time.

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{EvictParams, ListParams};
use kube::{Api, Client, ResourceExt};
use operator_common::{RetryPolicy, is_not_found, retry};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DaemonError;
use crate::lease::LeaderLock;

const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";
const EVICTION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Cordon, drain and uncordon of this node
#[async_trait::async_trait]
pub trait NodeOps: Send + Sync {
    async fn cordon(&self) -> Result<(), DaemonError>;
    async fn drain(&self, token: &CancellationToken) -> Result<(), DaemonError>;
    async fn uncordon(&self) -> Result<(), DaemonError>;
}

/// Whether draining should evict `pod`
///
/// DaemonSet pods would be recreated on the node, mirror pods cannot be
/// evicted, and finished pods hold nothing.
pub fn evictable(pod: &Pod) -> bool {
    let daemonset = pod
        .owner_references()
        .iter()
        .any(|owner| owner.kind == "DaemonSet");
    let mirror = pod.annotations().contains_key(MIRROR_POD_ANNOTATION);
    let finished = pod
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .is_some_and(|phase| phase == "Succeeded" || phase == "Failed");
    !(daemonset || mirror || finished)
}

#[derive(Clone)]
pub struct KubeNodeOps {
    client: Client,
    node_name: String,
    drain_timeout: Duration,
}

impl std::fmt::Debug for KubeNodeOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeNodeOps")
            .field("node_name", &self.node_name)
            .field("drain_timeout", &self.drain_timeout)
            .finish_non_exhaustive()
    }
}

impl KubeNodeOps {
    pub fn new(client: Client, node_name: &str, drain_timeout: Duration) -> Self {
        Self {
            client,
            node_name: node_name.to_string(),
            drain_timeout,
        }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    async fn evict_all(&self, token: &CancellationToken) -> Result<(), DaemonError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={}", self.node_name));
        let targets: Vec<Pod> = pods
            .list(&params)
            .await?
            .items
            .into_iter()
            .filter(evictable)
            .collect();
        info!(node = %self.node_name, pods = targets.len(), "Draining node");

        for pod in &targets {
            let (name, namespace) = (pod.name_any(), pod.namespace().unwrap_or_default());
            let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
            match api.evict(&name, &EvictParams::default()).await {
                Ok(_) => debug!(pod = %name, namespace = %namespace, "Evicted pod"),
                Err(e) if is_not_found(&e) => {}
                Err(e) => {
                    return Err(DaemonError::Drain(format!("evicting {namespace}/{name}: {e}")));
                }
            }
        }

        self.wait_for_deletion(&targets, token).await
    }

    /// Wait until every evicted pod is gone or replaced
    async fn wait_for_deletion(&self, pods: &[Pod], token: &CancellationToken) -> Result<(), DaemonError> {
        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        let mut remaining: Vec<&Pod> = pods.iter().collect();

        while !remaining.is_empty() {
            let mut still_running = Vec::new();
            for pod in remaining {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace().unwrap_or_default());
                match api.get_opt(&pod.name_any()).await? {
                    Some(current) if current.uid() == pod.uid() => still_running.push(pod),
                    _ => {}
                }
            }
            remaining = still_running;
            if remaining.is_empty() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DaemonError::Drain(format!(
                    "{} pods still running after {:?}",
                    remaining.len(),
                    self.drain_timeout
                )));
            }
            tokio::select! {
                _ = token.cancelled() => return Err(DaemonError::Cancelled),
                _ = tokio::time::sleep(EVICTION_POLL_INTERVAL) => {}
            }
        }
        info!(node = %self.node_name, "Node drained");
        Ok(())
    }
}

fn retryable(error: &DaemonError) -> bool {
    !matches!(error, DaemonError::Cancelled)
}

#[async_trait::async_trait]
impl NodeOps for KubeNodeOps {
    async fn cordon(&self) -> Result<(), DaemonError> {
        retry(RetryPolicy::DRAIN, "cordon", retryable, || async {
            self.nodes().cordon(&self.node_name).await?;
            Ok::<(), DaemonError>(())
        })
        .await?;
        info!(node = %self.node_name, "Node cordoned");
        Ok(())
    }

    async fn drain(&self, token: &CancellationToken) -> Result<(), DaemonError> {
        retry(RetryPolicy::DRAIN, "drain", retryable, || self.evict_all(token)).await
    }

    async fn uncordon(&self) -> Result<(), DaemonError> {
        retry(RetryPolicy::DRAIN, "uncordon", retryable, || async {
            self.nodes().uncordon(&self.node_name).await?;
            Ok::<(), DaemonError>(())
        })
        .await?;
        info!(node = %self.node_name, "Node uncordoned");
        Ok(())
    }
}

/// Runs reconfiguration under the lease, with the node drained when asked
///
/// Shared by every family loop on the node so they never interleave.
pub struct DrainCoordinator {
    lock: Arc<dyn LeaderLock>,
    node_ops: Arc<dyn NodeOps>,
    serial: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for DrainCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainCoordinator").finish_non_exhaustive()
    }
}

impl DrainCoordinator {
    pub fn new(lock: Arc<dyn LeaderLock>, node_ops: Arc<dyn NodeOps>) -> Self {
        Self {
            lock,
            node_ops,
            serial: tokio::sync::Mutex::new(()),
        }
    }

    /// Acquire the lease, optionally cordon and drain, run `f`, then clean up
    ///
    /// `f` receives a token cancelled if the lease is lost and returns whether
    /// to uncordon afterwards along with its result. A failed drain attempts an
    /// uncordon and returns the drain error without running `f`.
    pub async fn drain_and_run<T, F, Fut>(
        &self,
        drain: bool,
        token: &CancellationToken,
        f: F,
    ) -> Result<T, DaemonError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = (bool, T)>,
    {
        let _serial = self.serial.lock().await;
        let held = self.lock.acquire(token).await?;

        let outcome = self.run_held(drain, held, f).await;

        if let Err(e) = self.lock.release().await {
            warn!("Failed to release lease: {}", e);
        }
        outcome
    }

    async fn run_held<T, F, Fut>(
        &self,
        drain: bool,
        held: CancellationToken,
        f: F,
    ) -> Result<T, DaemonError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = (bool, T)>,
    {
        if drain {
            let prepared = match self.node_ops.cordon().await {
                Ok(()) => self.node_ops.drain(&held).await,
                Err(e) => Err(e),
            };
            if let Err(e) = prepared {
                if let Err(uncordon) = self.node_ops.uncordon().await {
                    warn!("Failed to uncordon after drain failure: {}", uncordon);
                }
                return Err(e);
            }
        } else {
            debug!("Drain skipped");
        }

        let (uncordon, value) = f(held).await;

        if drain && uncordon {
            self.node_ops.uncordon().await?;
        }
        Ok(value)
    }
}

//! Cluster-wide lease lock
//!
//! Nodes that drain before reconfiguring serialize on one `Lease` object in
//! the operator namespace. The holder renews it every retry period; another
//! node may take it over once `renewTime + leaseDurationSeconds` has passed.

use jiff::{SignedDuration, Timestamp};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{ListParams, PostParams};
use kube::{Api, Client};
use operator_common::{is_conflict, retry_on_conflict};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DaemonError;

pub const LEASE_NAME: &str = "n3000-daemon-lease";

/// Leader-election timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTiming {
    pub lease_duration: Duration,
    /// How long renewals may keep failing before the lease counts as lost
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl LeaseTiming {
    pub fn multi_node(lease_duration: Duration) -> Self {
        Self {
            lease_duration,
            renew_deadline: lease_duration.saturating_sub(Duration::from_secs(30)),
            retry_period: Duration::from_secs(26),
        }
    }

    /// Relaxed timing for single-node clusters, where drain is always skipped
    pub fn single_node() -> Self {
        Self {
            lease_duration: Duration::from_secs(270),
            renew_deadline: Duration::from_secs(240),
            retry_period: Duration::from_secs(60),
        }
    }

    /// Pick the timing by counting the cluster's nodes
    pub async fn detect(client: Client, lease_duration: Duration) -> Result<Self, DaemonError> {
        let nodes: Api<Node> = Api::all(client);
        let list = nodes.list(&ListParams::default().limit(2)).await?;
        if list.items.len() == 1 {
            info!("Single-node cluster detected, using relaxed lease timing");
            Ok(Self::single_node())
        } else {
            Ok(Self::multi_node(lease_duration))
        }
    }
}

fn duration_seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

/// Whether `identity` may take or keep the lease at `now`
pub fn can_acquire(spec: &LeaseSpec, identity: &str, now: Timestamp) -> bool {
    match spec.holder_identity.as_deref() {
        None | Some("") => true,
        Some(holder) if holder == identity => true,
        Some(_) => {
            let Some(renewed) = spec.renew_time.as_ref() else {
                return true;
            };
            let duration = SignedDuration::from_secs(i64::from(spec.lease_duration_seconds.unwrap_or(0)));
            match renewed.0.checked_add(duration) {
                Ok(expiry) => expiry < now,
                Err(_) => false,
            }
        }
    }
}

/// Mark `spec` as held by `identity`
fn take(spec: &mut LeaseSpec, identity: &str, timing: &LeaseTiming, now: Timestamp) {
    if spec.holder_identity.as_deref() != Some(identity) {
        spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
        spec.acquire_time = Some(MicroTime(now));
    }
    spec.holder_identity = Some(identity.to_string());
    spec.lease_duration_seconds = Some(duration_seconds(timing.lease_duration));
    spec.renew_time = Some(MicroTime(now));
}

/// Mutual exclusion between nodes
#[async_trait::async_trait]
pub trait LeaderLock: Send + Sync {
    /// Block until the lock is held or `token` is cancelled
    ///
    /// The returned token is cancelled when the lock is lost or `token` is cancelled.
    async fn acquire(&self, token: &CancellationToken) -> Result<CancellationToken, DaemonError>;

    async fn release(&self) -> Result<(), DaemonError>;
}

#[derive(Clone)]
struct LeaseRecord {
    api: Api<Lease>,
    name: String,
    identity: String,
    timing: LeaseTiming,
}

impl LeaseRecord {
    /// One acquire-or-renew round; `false` while another node holds the lease
    async fn try_acquire_or_renew(&self) -> Result<bool, kube::Error> {
        let now = Timestamp::now();
        let Some(mut lease) = self.api.get_opt(&self.name).await? else {
            let mut spec = LeaseSpec::default();
            take(&mut spec, &self.identity, &self.timing, now);
            spec.lease_transitions = Some(0);
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(self.name.clone()),
                    ..Default::default()
                },
                spec: Some(spec),
            };
            return match self.api.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(true),
                Err(e) if is_conflict(&e) => Ok(false),
                Err(e) => Err(e),
            };
        };

        let spec = lease.spec.get_or_insert_default();
        if !can_acquire(spec, &self.identity, now) {
            return Ok(false);
        }
        take(spec, &self.identity, &self.timing, now);

        // Replace carries the resourceVersion we read
        match self.api.replace(&self.name, &PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(e) if is_conflict(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Clear the holder so the next node need not wait for expiry
    async fn clear_holder(&self) -> Result<(), kube::Error> {
        retry_on_conflict("lease release", || async {
            let Some(mut lease) = self.api.get_opt(&self.name).await? else {
                return Ok(());
            };
            let spec = lease.spec.get_or_insert_default();
            if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
                return Ok(());
            }
            spec.holder_identity = None;
            spec.lease_duration_seconds = Some(1);
            spec.renew_time = Some(MicroTime(Timestamp::now()));
            self.api
                .replace(&self.name, &PostParams::default(), &lease)
                .await
                .map(|_| ())
        })
        .await
    }

    async fn renew_until_lost(self, held: CancellationToken) {
        let deadline = self.timing.renew_deadline;
        let mut last_renewed = tokio::time::Instant::now();
        loop {
            tokio::select! {
                _ = held.cancelled() => return,
                _ = tokio::time::sleep(self.timing.retry_period) => {}
            }
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    debug!(lease = %self.name, "Lease renewed");
                    last_renewed = tokio::time::Instant::now();
                }
                Ok(false) => {
                    warn!(lease = %self.name, "Lease taken over by another node");
                    held.cancel();
                    return;
                }
                Err(e) if last_renewed.elapsed() > deadline => {
                    warn!(lease = %self.name, "Lease lost, renewals failing past deadline: {}", e);
                    held.cancel();
                    return;
                }
                Err(e) => warn!(lease = %self.name, "Failed to renew lease: {}", e),
            }
        }
    }
}

/// `Lease`-backed [`LeaderLock`] with the node name as identity
pub struct LeaseLock {
    record: LeaseRecord,
    renewer: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl std::fmt::Debug for LeaseLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseLock")
            .field("name", &self.record.name)
            .field("identity", &self.record.identity)
            .field("timing", &self.record.timing)
            .finish_non_exhaustive()
    }
}

impl LeaseLock {
    pub fn new(client: Client, namespace: &str, identity: &str, timing: LeaseTiming) -> Self {
        Self {
            record: LeaseRecord {
                api: Api::namespaced(client, namespace),
                name: LEASE_NAME.to_string(),
                identity: identity.to_string(),
                timing,
            },
            renewer: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl LeaderLock for LeaseLock {
    async fn acquire(&self, token: &CancellationToken) -> Result<CancellationToken, DaemonError> {
        info!(lease = %self.record.name, identity = %self.record.identity, "Acquiring lease");
        loop {
            match self.record.try_acquire_or_renew().await {
                Ok(true) => break,
                Ok(false) => debug!(lease = %self.record.name, "Lease held by another node"),
                Err(e) => warn!(lease = %self.record.name, "Failed to acquire lease: {}", e),
            }
            tokio::select! {
                _ = token.cancelled() => return Err(DaemonError::Cancelled),
                _ = tokio::time::sleep(self.record.timing.retry_period) => {}
            }
        }
        info!(lease = %self.record.name, "Lease acquired");

        let held = token.child_token();
        let handle = tokio::spawn(self.record.clone().renew_until_lost(held.clone()));
        let previous = self
            .renewer
            .lock()
            .map_err(|_| DaemonError::Lease("renewer state poisoned".to_string()))?
            .replace((handle, held.clone()));
        if let Some((handle, token)) = previous {
            token.cancel();
            handle.abort();
        }
        Ok(held)
    }

    async fn release(&self) -> Result<(), DaemonError> {
        let renewer = self.renewer.lock().ok().and_then(|mut renewer| renewer.take());
        if let Some((handle, held)) = renewer {
            held.cancel();
            let _ = handle.await;
        }
        self.record
            .clear_holder()
            .await
            .map_err(|e| DaemonError::Lease(format!("release failed: {e}")))?;
        info!(lease = %self.record.name, "Lease released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(holder: Option<&str>, renewed: Timestamp, seconds: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: holder.map(str::to_string),
            renew_time: Some(MicroTime(renewed)),
            lease_duration_seconds: Some(seconds),
            ..Default::default()
        }
    }

    #[test]
    fn test_timing() {
        let multi = LeaseTiming::multi_node(Duration::from_secs(137));
        assert_eq!(multi.renew_deadline, Duration::from_secs(107));
        assert_eq!(multi.retry_period, Duration::from_secs(26));

        let short = LeaseTiming::multi_node(Duration::from_secs(10));
        assert_eq!(short.renew_deadline, Duration::ZERO);

        let single = LeaseTiming::single_node();
        assert_eq!(single.lease_duration, Duration::from_secs(270));
        assert_eq!(single.renew_deadline, Duration::from_secs(240));
        assert_eq!(single.retry_period, Duration::from_secs(60));
    }

    #[test]
    fn test_free_or_own_lease_can_be_taken() {
        let now = Timestamp::now();
        assert!(can_acquire(&LeaseSpec::default(), "worker-1", now));
        assert!(can_acquire(&spec(Some(""), now, 137), "worker-1", now));
        assert!(can_acquire(&spec(Some("worker-1"), now, 137), "worker-1", now));
    }

    #[test]
    fn test_foreign_lease_until_expiry() {
        let now = Timestamp::now();
        let recent = now - SignedDuration::from_secs(60);
        assert!(!can_acquire(&spec(Some("worker-2"), recent, 137), "worker-1", now));

        let stale = now - SignedDuration::from_secs(200);
        assert!(can_acquire(&spec(Some("worker-2"), stale, 137), "worker-1", now));

        // Released leases have a one second duration
        let released = now - SignedDuration::from_secs(2);
        assert!(can_acquire(&spec(Some("worker-2"), released, 1), "worker-1", now));
    }

    #[test]
    fn test_take_counts_transitions() {
        let timing = LeaseTiming::multi_node(Duration::from_secs(137));
        let now = Timestamp::now();
        let mut lease = spec(Some("worker-2"), now, 137);
        lease.lease_transitions = Some(3);

        take(&mut lease, "worker-1", &timing, now);
        assert_eq!(lease.holder_identity.as_deref(), Some("worker-1"));
        assert_eq!(lease.lease_transitions, Some(4));
        assert_eq!(lease.lease_duration_seconds, Some(137));

        // Renewal by the holder is not a transition
        take(&mut lease, "worker-1", &timing, now);
        assert_eq!(lease.lease_transitions, Some(4));
    }
}

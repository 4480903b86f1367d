//! Triggered reconcile loops.
//!
//! A loop runs one reconcile pass whenever any of its watch streams reports a
//! change, when the pass asked to be requeued, or when the resync interval
//! elapses. Passes never overlap, and the loop stops at the next suspension
//! point once its cancellation token fires.

use futures::stream::{BoxStream, StreamExt};
use futures::{FutureExt, Stream};
use kube::{Api, Resource};
use kube_runtime::watcher::{self, Event};
use kube_runtime::{WatchStreamExt, predicates, PredicateConfig};
use serde::de::DeserializeOwned;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::ExponentialBackoff;

/// Stream of "something changed" notifications
pub type Triggers = BoxStream<'static, ()>;

/// What the loop should do after a successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Run again after this delay (or earlier on a trigger)
    After(Duration),
    /// Wait for the next trigger or resync
    Resync,
}

/// Trigger on every applied, deleted or initially listed object
pub fn object_triggers<K>(api: Api<K>, config: watcher::Config) -> Triggers
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    watcher::watcher(api, config)
        .default_backoff()
        .filter_map(|event| async move {
            match event {
                Ok(Event::Apply(_) | Event::Delete(_) | Event::InitDone) => Some(()),
                Ok(Event::Init | Event::InitApply(_)) => None,
                Err(e) => {
                    warn!("Watch error: {}", e);
                    None
                }
            }
        })
        .boxed()
}

/// Trigger only when an object's `metadata.generation` changes
///
/// Status-only updates are ignored.
pub fn generation_triggers<K>(api: Api<K>, config: watcher::Config) -> Triggers
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash,
{
    watcher::watcher(api, config)
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation, PredicateConfig::default())
        .filter_map(|object| async move {
            match object {
                Ok(_) => Some(()),
                Err(e) => {
                    warn!("Watch error: {}", e);
                    None
                }
            }
        })
        .boxed()
}

/// Merge several trigger streams into one
pub fn merge_triggers(streams: Vec<Triggers>) -> Triggers {
    futures::stream::select_all(streams).boxed()
}

/// Settings for [`run_triggered`]
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Name used in logs
    pub name: String,
    /// Interval between passes when nothing happens; `None` waits for triggers only
    pub resync: Option<Duration>,
    /// First delay after a failed pass
    pub error_backoff: Duration,
    /// Longest delay after repeated failures
    pub max_error_backoff: Duration,
}

impl LoopConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resync: None,
            error_backoff: Duration::from_secs(5),
            max_error_backoff: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn resync(mut self, interval: Duration) -> Self {
        self.resync = Some(interval);
        self
    }
}

/// Drive `pass` from `triggers` until `token` is cancelled or the triggers end
pub async fn run_triggered<S, F, Fut, E>(
    config: LoopConfig,
    triggers: S,
    token: CancellationToken,
    mut pass: F,
) where
    S: Stream<Item = ()> + Send + Unpin,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Requeue, E>>,
    E: Display,
{
    let mut triggers = triggers.fuse();
    let mut backoff = ExponentialBackoff::new(config.error_backoff, 2, config.max_error_backoff);
    let mut deadline: Option<Instant> = config.resync.map(|d| Instant::now() + d);

    info!("Starting {} loop", config.name);
    loop {
        let wait = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = token.cancelled() => {
                info!("{} loop shutdown requested", config.name);
                break;
            }
            trigger = triggers.next() => {
                if trigger.is_none() {
                    warn!("{} trigger stream ended", config.name);
                    break;
                }
                // Coalesce a burst of events into one pass
                while let Some(Some(())) = triggers.next().now_or_never() {}
                debug!("{} pass triggered by watch event", config.name);
            }
            _ = wait => {
                debug!("{} pass triggered by timer", config.name);
            }
        }

        let outcome = tokio::select! {
            _ = token.cancelled() => {
                info!("{} loop cancelled during pass", config.name);
                break;
            }
            outcome = pass() => outcome,
        };

        let now = Instant::now();
        deadline = match outcome {
            Ok(Requeue::After(delay)) => {
                backoff.reset();
                Some(now + delay)
            }
            Ok(Requeue::Resync) => {
                backoff.reset();
                config.resync.map(|d| now + d)
            }
            Err(e) => {
                let delay = backoff.next_backoff();
                error!("{} pass failed: {}, retrying in {:?}", config.name, e, delay);
                Some(now + delay)
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_trigger_and_stops_on_cancel() {
        let (tx, rx) = mpsc::unbounded::<()>();
        let token = CancellationToken::new();
        let passes = Arc::new(AtomicU32::new(0));

        let handle = {
            let token = token.clone();
            let passes = passes.clone();
            tokio::spawn(async move {
                run_triggered(LoopConfig::new("test"), rx, token, || {
                    passes.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, String>(Requeue::Resync) }
                })
                .await;
            })
        };

        tx.unbounded_send(()).unwrap();
        tx.unbounded_send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Burst coalesced into a single pass
        assert_eq!(passes.load(Ordering::SeqCst), 1);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_and_resync_timers() {
        let (_tx, rx) = mpsc::unbounded::<()>();
        let token = CancellationToken::new();
        let passes = Arc::new(AtomicU32::new(0));

        let handle = {
            let token = token.clone();
            let passes = passes.clone();
            tokio::spawn(async move {
                let config = LoopConfig::new("test").resync(Duration::from_secs(300));
                run_triggered(config, rx, token, || {
                    let n = passes.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Ok::<_, String>(Requeue::After(Duration::from_secs(60)))
                        } else {
                            Ok(Requeue::Resync)
                        }
                    }
                })
                .await;
            })
        };

        // First pass on resync, second 60s later, third after another full resync
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(290)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 3);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pass_is_retried_with_backoff() {
        let (tx, rx) = mpsc::unbounded::<()>();
        let token = CancellationToken::new();
        let passes = Arc::new(AtomicU32::new(0));

        let handle = {
            let token = token.clone();
            let passes = passes.clone();
            tokio::spawn(async move {
                run_triggered(LoopConfig::new("test"), rx, token, || {
                    let n = passes.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 { Err("boom".to_string()) } else { Ok(Requeue::Resync) }
                    }
                })
                .await;
            })
        };

        tx.unbounded_send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 1);
        // 5s then 10s error backoff
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 3);
        // Success without resync: idle until the next trigger
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 3);

        token.cancel();
        handle.await.unwrap();
    }
}

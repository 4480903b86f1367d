//! Shared controller plumbing
//!
//! Pieces both the cluster operator and the node daemon use: backoff and retry,
//! optimistic-concurrency handling, triggered reconcile loops and health
//! probes.

pub mod backoff;
pub mod conflict;
pub mod probes;
pub mod signal;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod watch;

pub use backoff::{ExponentialBackoff, RetryPolicy, retry};
pub use conflict::{is_conflict, is_not_found, retry_on_conflict};
pub use probes::{Readiness, serve_probes};
pub use signal::cancel_on_signal;
pub use watch::{
    LoopConfig, Requeue, Triggers, generation_triggers, merge_triggers, object_triggers,
    run_triggered,
};

//! API error classification and optimistic-concurrency retry

use kube::Error as KubeError;
use std::future::Future;

use crate::backoff::{RetryPolicy, retry};

fn api_code(error: &KubeError) -> Option<u16> {
    match error {
        KubeError::Api(response) => Some(response.code),
        _ => None,
    }
}

/// Write rejected because the resourceVersion was stale
pub fn is_conflict(error: &KubeError) -> bool {
    api_code(error) == Some(409)
}

pub fn is_not_found(error: &KubeError) -> bool {
    api_code(error) == Some(404)
}

pub fn is_already_exists(error: &KubeError) -> bool {
    is_conflict(error)
}

/// Re-run a read-modify-write `op` while it fails with a conflict
///
/// `op` must re-read the object on every call.
pub async fn retry_on_conflict<T, F, Fut>(what: &str, op: F) -> Result<T, KubeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, KubeError>>,
{
    retry(RetryPolicy::CONFLICT, what, is_conflict, op).await
}

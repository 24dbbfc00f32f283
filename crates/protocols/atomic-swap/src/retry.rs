//! Single-retry policy for adapter calls

use std::future::Future;
use std::time::Duration;

use portal_core::ChainResult;

/// Pause before the one retry
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Run `op`; on a transient failure wait and run it exactly once more.
/// Non-transient failures (hash mismatches, bad input, state conflicts)
/// come back immediately.
pub async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> ChainResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ChainResult<T>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            tracing::warn!(operation = what, error = %e, "Transient failure, retrying once");
            tokio::time::sleep(RETRY_DELAY).await;
            op().await
        }
        other => other,
    }
}

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::BackoffPolicy;
use crate::NetworkError;
use crate::Result;

/// Run `task` until it succeeds, retrying recoverable failures
///
/// Each attempt is bounded by `policy.timeout_ms`. The pause between
/// attempts starts at `base_delay_ms` and doubles up to `max_delay_ms`.
/// `max_retries` counts retries after the first attempt. Errors that are
/// not recoverable are returned at once; after the last attempt the last
/// error is returned as-is.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    policy: BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let timeout_duration = Duration::from_millis(policy.timeout_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);
    let mut current_delay = Duration::from_millis(policy.base_delay_ms);
    let mut attempt = 0;

    loop {
        let last_error = match timeout(timeout_duration, task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(error)) if !error.is_recoverable() => return Err(error),
            Ok(Err(error)) => {
                warn!(?error, attempt, "attempt failed");
                error
            }
            Err(_) => {
                warn!(?timeout_duration, attempt, "attempt timed out");
                NetworkError::RetryTimeoutError(timeout_duration).into()
            }
        };

        if attempt >= policy.max_retries {
            warn!("task failed after {} retries", attempt);
            return Err(last_error);
        }
        attempt += 1;

        debug!("retrying in {:?}...", current_delay);
        sleep(current_delay).await;
        current_delay = (current_delay * 2).min(max_delay);
    }
}

//! Per-attempt deadline, applied where tasks are built rather than inside
//! the scheduler, so the scheduler stays free of timeout policy.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::time::Duration;

use crate::error::AttemptTimeout;

/// Wrap `task` so that each attempt fails with [`AttemptTimeout`] once it
/// has run for `limit`. A timed-out attempt is an ordinary failure and is
/// retried like any other.
pub fn with_attempt_timeout<F, Fut, T>(
    limit: Duration,
    mut task: F,
) -> impl FnMut(u32) -> BoxFuture<'static, anyhow::Result<T>> + Send + 'static
where
    F: FnMut(u32) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    move |attempt| {
        let attempt_future = task(attempt);
        async move {
            match tokio::time::timeout(limit, attempt_future).await {
                Ok(result) => result,
                Err(_) => Err(AttemptTimeout {
                    attempt,
                    elapsed_ms: limit.as_millis() as u64,
                }
                .into()),
            }
        }
        .boxed()
    }
}

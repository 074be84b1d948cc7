//! Bounded retry with exponential backoff for a single fallible
//! operation.
//!
//! Retry disposition is the caller's decision: whatever the closure
//! returns as `Err` is retried until the attempts run out. The GitLab
//! client only fails inside the retried closure on transport errors and
//! 5xx responses, so 4xx rejections are never retried.

use std::future::Future;
use std::time::Duration;

/// Attempt count and backoff base for [`retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// Invoke `op` until it succeeds or `options.attempts` invocations have
/// failed, sleeping `base_delay * 2^attempt_index` between attempts.
/// The last failure is propagated after exhaustion.
pub async fn retry<T, E, F, Fut>(options: RetryOptions, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = options.attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= attempts {
                    return Err(err);
                }
                let delay = options.base_delay * 2u32.pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

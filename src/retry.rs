use std::future::Future;
use std::time::Duration;

/// Bounded attempts with a fixed pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A single check after waiting `delay` once.
    pub fn once(delay: Duration) -> Self {
        Self::new(1, delay)
    }
}

/// Runs `predicate` (given the zero-based attempt number) until it yields `true` or the
/// attempts run out. Sleeps `delay` before every attempt so the page can settle.
pub async fn retry_until<F, Fut>(policy: RetryPolicy, mut predicate: F) -> bool
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 0..policy.max_attempts {
        if !policy.delay.is_zero() {
            tokio::time::sleep(policy.delay).await;
        }
        if predicate(attempt).await {
            return true;
        }
    }
    false
}

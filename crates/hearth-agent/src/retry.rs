use std::{future::Future, time::Duration};

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub backoff_max_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_ms,
            backoff_max_ms: backoff_ms.saturating_mul(8).max(backoff_ms),
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(compute_backoff_ms(*self, attempt))
    }
}

pub(crate) fn compute_backoff_ms(cfg: RetryPolicy, attempt: u32) -> u64 {
    // attempt is 1-based.
    let pow = attempt.saturating_sub(1).min(30);
    let mult = 1u64.checked_shl(pow).unwrap_or(u64::MAX);
    cfg.backoff_ms.saturating_mul(mult).min(cfg.backoff_max_ms)
}

/// Runs `op` until it succeeds or `policy.max_attempts` is used up, sleeping
/// the backoff between attempts. Returns the last error on exhaustion.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(err) if attempt < policy.max_attempts => {
                tracing::debug!(%err, attempt, max = policy.max_attempts, "retrying");
                let delay = policy.backoff(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

//! Bounded retry for whole-account domain actions
//!
//! Domain actions hit a flaky exchange; each attempt cycle is bounded by a
//! fixed attempt cap with a jittered delay between attempts. Store failures
//! and WAF blocks short-circuit immediately: the first is fatal to the run,
//! the second is recorded as a `cloudflare` requeue marker instead of being
//! hammered again.

use crate::db::StoreError;
use crate::exchange::CloudflareBlock;
use anyhow::Result;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for one account action
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the initial try
    pub max_attempts: u32,
    /// Jittered delay range between attempts, in seconds
    pub delay_range_secs: (u64, u64),
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_range_secs: (2, 5),
        }
    }
}

impl RetryPolicy {
    fn delay(&self) -> Duration {
        let (lo, hi) = self.delay_range_secs;
        let secs = rand::thread_rng().gen_range(lo.min(hi)..=hi.max(lo));
        Duration::from_secs(secs)
    }
}

/// Whether an error may be retried at all. Store integrity failures must
/// surface unchanged, and a WAF challenge only clears with a cooldown far
/// longer than any in-run delay.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<StoreError>().is_none() && err.downcast_ref::<CloudflareBlock>().is_none()
}

/// Run an async operation up to `policy.max_attempts` times
pub async fn retry_async<T, Fut, F>(policy: &RetryPolicy, op_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("retry op={} succeeded on attempt {}", op_name, attempt);
                }
                return Ok(value);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    debug!("retry op={} non-retryable: {}", op_name, err);
                    return Err(err);
                }
                if attempt >= policy.max_attempts {
                    warn!("retry op={} failed after {} attempts: {}", op_name, attempt, err);
                    return Err(err);
                }

                let delay = policy.delay();
                debug!(
                    "retry op={} attempt={} failed ({}), next in {:?}",
                    op_name, attempt, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

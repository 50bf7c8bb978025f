//! Shared rate-limit backoff.
//!
//! Both scanners hand their in-flight intent to the coordinator when the
//! upstream answers 429 and get the very same intent back once the delay has
//! elapsed. Replaying the captured intent, rather than recomputing "what comes
//! next" after the wait, keeps pages from being skipped or repeated.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct RateLimitCoordinator {
    delay: Duration,
    retries: AtomicU64,
}

impl RateLimitCoordinator {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            retries: AtomicU64::new(0),
        }
    }

    /// Total number of retries scheduled since creation.
    pub fn retries_scheduled(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Waits the fixed delay, then returns `action` for replay.
    pub async fn schedule_retry<A: Debug>(&self, action: A) -> A {
        let retry = self.retries.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            ?action,
            retry,
            delay_ms = self.delay.as_millis() as u64,
            "upstream rate limited, replaying after backoff"
        );
        tokio::time::sleep(self.delay).await;
        action
    }
}

impl Default for RateLimitCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT_DELAY)
    }
}

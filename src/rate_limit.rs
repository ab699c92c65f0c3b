//! Fixed-delay pacing for upstream requests.

use std::time::Duration;

use tracing::debug;

/// Suspends the caller for a fixed delay before each upstream request.
///
/// Purely time-based: the upstream ceilings this targets are per-minute
/// request counts, so a constant gap between requests is enough. Call
/// [`wait`](RateLimiter::wait) before every request, including the first.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    delay: Duration,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }
        debug!(delay_ms = self.delay.as_millis() as u64, "pacing upstream request");
        tokio::time::sleep(self.delay).await;
    }
}

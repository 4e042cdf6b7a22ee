use std::time::Duration;

use async_trait::async_trait;

/// Suspends the current job between upstream calls. Retry backoff, politeness
/// delays and failure cooldowns all go through this so tests can observe them.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

use std::time::Duration;

/// Source of delays for the sync loop, swapped out in tests.
pub trait Clock {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioClock;

impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

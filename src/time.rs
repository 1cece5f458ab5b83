//! Delay source shared by the retry loop and the poller

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

/// Something that can wait for a duration
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real delays on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and remembers every requested delay.
///
/// Lets callers assert on the simulated backoff without waiting for it.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }

    /// Sum of all requested delays
    pub fn total(&self) -> Duration {
        self.delays.lock().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
        tokio::task::yield_now().await;
    }
}

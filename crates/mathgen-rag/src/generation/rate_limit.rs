//! Process-wide spacing of outbound generation calls
//!
//! Callers `acquire` a dispatch slot immediately before sending a request.
//! The last dispatch instant is read and written under one async mutex, so
//! two concurrent callers can never both observe a stale timestamp; a
//! waiting caller keeps the lock while it sleeps and the next one queues
//! behind it.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Minimum-interval rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_dispatch: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_dispatch: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a call may be dispatched and record the dispatch instant
    ///
    /// Returns the recorded instant. The caller should dispatch right away.
    pub async fn acquire(&self) -> Instant {
        let mut last = self.last_dispatch.lock().await;

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?} before next call", wait);
                sleep(wait).await;
            }
        }

        let now = Instant::now();
        *last = Some(now);
        now
    }

    /// Instant of the most recent dispatch, if any
    pub async fn last_dispatch(&self) -> Option<Instant> {
        *self.last_dispatch.lock().await
    }
}

//! Process-wide request budget.
//!
//! A limiter hands out at most `max_requests` slots per `window`. Each slot
//! is held for the full window after it is granted, so no window of that
//! length ever sees more than `max_requests` grants. Waiters are served in
//! arrival order because tokio's semaphore is fair.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::sleep;

/// Rate limiter shared by every outbound call of a run.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    /// # Arguments
    /// * `max_requests` - Maximum grants per window (clamped to at least 1)
    /// * `window` - Length of the window
    pub fn new(max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_requests)),
            max_requests,
            window,
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Stop handing out slots. Queued and later callers get [`RateLimitError::Closed`].
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Wait for a slot.
    ///
    /// The permit is moved into a background task that releases it once the
    /// window has elapsed, which frees the slot for the next queued caller.
    pub async fn acquire(&self) -> Result<(), RateLimitError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RateLimitError::Closed)?;

        let window = self.window;
        tokio::spawn(async move {
            sleep(window).await;
            drop(permit);
        });

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limiter closed")]
    Closed,
}

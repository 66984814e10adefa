//! Windowed rate limiting for transform collaborators.
//!
//! Remote APIs behind the transforms budget calls per time window (e.g. 4
//! search requests per minute). [`RateLimiter`] enforces such a budget: once
//! `calls` have been made inside the current window, the next caller sleeps
//! until the window rolls over. Calls are delayed, never dropped.
//!
//! This is independent of a stage's `max_concurrent_calls`: the stage caps
//! how many calls are in flight, the limiter caps how many start per window.
//!
//! ```rust,ignore
//! let search = RateLimited::new(search_transform, RateLimiter::per_minute(4)?);
//! ```

use crate::error::{PipelineError, Result};
use crate::item::Item;
use crate::transform::{Transform, TransformResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{self, Instant};
use tracing::debug;

/// Calls made in the window that started at `started`
#[derive(Debug, Default)]
struct Window {
    started: Option<Instant>,
    used: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    calls: u32,
    period: Duration,
    // Held across the sleep so waiting callers queue up in order.
    window: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(calls: u32, period: Duration) -> Result<Self> {
        if calls == 0 {
            return Err(PipelineError::config("rate limit must allow at least one call"));
        }
        if period.is_zero() {
            return Err(PipelineError::config("rate limit period must be positive"));
        }
        Ok(Self {
            calls,
            period,
            window: Mutex::new(Window::default()),
        })
    }

    pub fn per_minute(calls: u32) -> Result<Self> {
        Self::new(calls, Duration::from_secs(60))
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait until one more call fits in the budget, then claim it
    pub async fn acquire(&self) {
        let mut window = self.window.lock().await;
        let now = Instant::now();

        match window.started {
            Some(started) if now.duration_since(started) < self.period => {
                if window.used >= self.calls {
                    let wait = self.period - now.duration_since(started);
                    debug!(
                        wait_ms = wait.as_millis() as u64,
                        calls = self.calls,
                        "rate limit reached, delaying call"
                    );
                    time::sleep(wait).await;
                    window.started = Some(Instant::now());
                    window.used = 0;
                }
            }
            _ => {
                window.started = Some(now);
                window.used = 0;
            }
        }

        window.used += 1;
    }
}

/// A transform whose calls go through a [`RateLimiter`] first
pub struct RateLimited<T> {
    inner: T,
    limiter: RateLimiter,
}

impl<T: Transform> RateLimited<T> {
    pub fn new(inner: T, limiter: RateLimiter) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl<T: Transform> Transform for RateLimited<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn call(&self, item: Item) -> TransformResult {
        self.limiter.acquire().await;
        self.inner.call(item).await
    }
}

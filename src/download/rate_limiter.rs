//! Sliding-window rate limiting for outbound requests.
//!
//! This module provides the [`RateLimiter`] struct which caps the number of
//! requests issued inside a trailing time window (60 seconds by default).
//! A single limiter is shared by every worker, so the ceiling applies to the
//! whole run rather than to individual tasks.
//!
//! # Overview
//!
//! The limiter keeps the timestamps of recent requests. Each call to
//! [`RateLimiter::acquire`] prunes timestamps that have aged out of the window;
//! if the window is still full it sleeps until the oldest timestamp expires and
//! checks again. The new timestamp is recorded only once the caller is allowed
//! through.
//!
//! Time is read through the [`Clock`] trait so tests can drive the limiter
//! with a [`ManualClock`] instead of real time.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use harvester_core::download::RateLimiter;
//!
//! # async fn example() {
//! // At most 60 requests in any 60-second window
//! let limiter = Arc::new(RateLimiter::per_minute(60));
//!
//! // Proceeds immediately while the window has room
//! limiter.acquire().await;
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::constants::{CUMULATIVE_WAIT_WARNING_THRESHOLD, RATE_WINDOW};

/// Source of time for the rate limiter.
///
/// The limiter never calls `Instant::now()` or `tokio::time::sleep` directly;
/// it goes through this trait so the window can be tested deterministically.
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Suspends the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by the Tokio timer.
///
/// Honors `tokio::time::pause()` in tests because both `now` and `sleep`
/// route through Tokio's time source.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Manually driven clock for deterministic tests.
///
/// `sleep` advances the clock by the requested duration instead of waiting,
/// then yields so other tasks get a chance to run.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Creates a manual clock starting at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }

    /// Returns how far the clock has moved since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Sliding-window rate limiter shared across concurrent tasks.
///
/// # Thread Safety
///
/// `RateLimiter` is `Send + Sync`; wrap it in `Arc` and hand a clone to every
/// worker. The window is guarded by a single mutex which is never held across
/// an `.await`: the check-and-append runs under the lock, sleeping does not.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum requests allowed inside one window. Zero means disabled.
    ceiling: usize,

    /// Length of the sliding window.
    window: Duration,

    /// Timestamps of requests still inside the window, oldest first.
    requests: Mutex<VecDeque<Instant>>,

    /// Time source.
    clock: Arc<dyn Clock>,

    /// Total time callers have spent waiting (milliseconds).
    cumulative_wait_ms: AtomicU64,
}

impl RateLimiter {
    /// Creates a limiter allowing `ceiling` requests per 60-second window.
    ///
    /// A ceiling of zero creates a disabled limiter.
    #[must_use]
    #[instrument(level = "debug")]
    pub fn per_minute(ceiling: usize) -> Self {
        Self::with_clock(ceiling, RATE_WINDOW, Arc::new(TokioClock))
    }

    /// Creates a limiter with an explicit window and clock.
    #[must_use]
    pub fn with_clock(ceiling: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        debug!(
            ceiling,
            window_secs = window.as_secs(),
            "creating rate limiter"
        );
        Self {
            ceiling,
            window,
            requests: Mutex::new(VecDeque::with_capacity(ceiling)),
            clock,
            cumulative_wait_ms: AtomicU64::new(0),
        }
    }

    /// Creates a disabled rate limiter that applies no delays.
    #[must_use]
    pub fn disabled() -> Self {
        Self::with_clock(0, RATE_WINDOW, Arc::new(TokioClock))
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.ceiling == 0
    }

    /// Returns the configured ceiling per window.
    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Returns the number of requests currently counted in the window.
    #[must_use]
    pub fn in_window(&self) -> usize {
        let mut requests = self.lock_window();
        prune(&mut requests, self.clock.now(), self.window);
        requests.len()
    }

    /// Returns the total time callers have waited on this limiter.
    #[must_use]
    pub fn cumulative_wait(&self) -> Duration {
        Duration::from_millis(self.cumulative_wait_ms.load(Ordering::SeqCst))
    }

    /// Waits until one more request fits in the window, then records it.
    ///
    /// The window may have changed while this caller slept (other callers may
    /// have taken the freed slot), so the check repeats until it succeeds.
    pub async fn acquire(&self) {
        if self.is_disabled() {
            return;
        }

        loop {
            let Some(delay) = self.try_record() else {
                return;
            };

            let cumulative = self.add_cumulative_wait(delay);
            debug!(
                delay_ms = delay.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                ceiling = self.ceiling,
                "rate window full, waiting"
            );
            if cumulative >= CUMULATIVE_WAIT_WARNING_THRESHOLD
                && cumulative.saturating_sub(delay) < CUMULATIVE_WAIT_WARNING_THRESHOLD
            {
                warn!(
                    cumulative_wait_secs = cumulative.as_secs(),
                    ceiling = self.ceiling,
                    "excessive rate limiting - consider raising requests_per_minute"
                );
            }

            self.clock.sleep(delay).await;
        }
    }

    /// Records a request if the window has room; otherwise returns how long
    /// until the oldest request leaves the window.
    fn try_record(&self) -> Option<Duration> {
        let mut requests = self.lock_window();
        let now = self.clock.now();
        prune(&mut requests, now, self.window);

        if requests.len() < self.ceiling {
            requests.push_back(now);
            return None;
        }

        requests
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
    }

    fn lock_window(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_wait(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_wait_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

/// Drops timestamps that are `window` or more in the past.
fn prune(requests: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = requests.front() {
        if now.saturating_duration_since(*oldest) >= window {
            requests.pop_front();
        } else {
            break;
        }
    }
}

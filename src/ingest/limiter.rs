//! Per-venue rate limiting with retry.
//!
//! A token bucket paces request starts at the configured rate while a
//! semaphore caps in-flight concurrency (1 for most venues, which is what
//! gives callers per-venue FIFO). `execute_with_retry` layers exponential
//! backoff on transient failures, and a sliding error window pushes the
//! whole limiter into backoff when a venue keeps failing.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::VenueId;
use crate::error::VenueError;

/// Bucket parameters for one venue.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Sustained requests per second.
    pub rps: f64,
    /// Maximum in-flight requests.
    pub concurrency: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rps: 5.0,
            concurrency: 1,
        }
    }
}

/// Retry and error-window parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
    /// Errors within `error_window` that trigger limiter backoff.
    pub error_threshold: usize,
    pub error_window: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(30),
            max_attempts: 3,
            error_threshold: 5,
            error_window: Duration::from_secs(300),
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

struct ErrorWindow {
    errors: VecDeque<Instant>,
}

impl ErrorWindow {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.errors.front() {
            if now.duration_since(*front) > window {
                self.errors.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Token-bucket limiter for one venue's outbound calls.
pub struct RateLimiter {
    venue: VenueId,
    config: RateLimitConfig,
    policy: RetryPolicy,
    bucket: Mutex<Bucket>,
    errors: Mutex<ErrorWindow>,
    permits: Arc<Semaphore>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(venue: VenueId, config: RateLimitConfig, policy: RetryPolicy) -> Self {
        Self {
            venue,
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            bucket: Mutex::new(Bucket {
                tokens: 1.0,
                last_refill: Instant::now(),
            }),
            errors: Mutex::new(ErrorWindow {
                errors: VecDeque::new(),
            }),
            config,
            policy,
        }
    }

    /// Whether the sliding error window currently rejects outgoing calls.
    #[must_use]
    pub fn in_backoff(&self) -> bool {
        let mut window = self.errors.lock();
        window.prune(Instant::now(), self.policy.error_window);
        window.errors.len() >= self.policy.error_threshold
    }

    /// Record one failure into the sliding window.
    pub fn record_error(&self) {
        self.errors.lock().errors.push_back(Instant::now());
    }

    /// Wait for a bucket token. Burst capacity is one token: callers pace
    /// at `rps` starts per second.
    async fn take_token(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.config.rps).min(1.0);
                bucket.last_refill = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - bucket.tokens;
                    Some(Duration::from_secs_f64(deficit / self.config.rps))
                }
            };
            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Run `op` under the bucket, the concurrency cap and the retry policy.
    ///
    /// Transient errors retry with exponential backoff (doubling from the
    /// initial delay, capped) up to `max_attempts` total attempts. Every
    /// failed series lands in the error window; once the window fills the
    /// limiter rejects calls with `rate_limited` until it clears.
    pub async fn execute_with_retry<T, F, Fut>(&self, op: F) -> Result<T, VenueError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, VenueError>>,
    {
        if self.in_backoff() {
            debug!(venue = %self.venue, "limiter in backoff, rejecting call");
            return Err(VenueError::RateLimited("limiter backoff".to_string()));
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| VenueError::VenueDown)?;

        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.take_token().await;

            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    warn!(
                        venue = %self.venue,
                        attempt,
                        backoff_secs = backoff.as_secs(),
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.policy.max_backoff);
                }
                Err(err) => {
                    self.record_error();
                    return Err(err);
                }
            }
        }
    }
}

//! Per-venue ingestion worker.
//!
//! One worker owns everything stateful about a venue's connection: the
//! circuit breaker, the rate limiter, the heartbeat and the reconnection
//! loop. Upward notifications travel over the raw tick channel and the
//! event bus; nothing holds a reference back into the worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::health::HealthRegistry;
use super::heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatVerdict};
use super::limiter::{RateLimitConfig, RateLimiter, RetryPolicy};
use crate::domain::Tick;
use crate::service::EventBus;
use crate::venue::{Capability, StreamEvent, VenueAdapter, VenueStream};

/// Reconnection policy for a streaming venue.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt; doubles per attempt.
    pub base_delay: Duration,
    /// Attempts before escalating to the poll fallback.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

/// Everything one worker needs to run its venue.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    pub circuit: CircuitBreakerConfig,
    pub heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectConfig,
    /// Cadence of the pull fallback when no stream is live.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            circuit: CircuitBreakerConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Ingestion worker for one venue.
pub struct VenueWorker {
    adapter: Arc<dyn VenueAdapter>,
    limiter: Arc<RateLimiter>,
    breaker: CircuitBreaker,
    health: Arc<HealthRegistry>,
    config: WorkerConfig,
    out: mpsc::Sender<Tick>,
    /// Monotonicity clamp for `received_ts`.
    last_received: Option<DateTime<Utc>>,
}

impl VenueWorker {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn VenueAdapter>,
        config: WorkerConfig,
        health: Arc<HealthRegistry>,
        events: EventBus,
        out: mpsc::Sender<Tick>,
    ) -> Self {
        let venue = adapter.info().id.clone();
        let limiter = Arc::new(RateLimiter::new(
            venue.clone(),
            config.rate_limit,
            config.retry,
        ));
        let breaker = CircuitBreaker::new(venue, config.circuit.clone(), events);
        Self {
            adapter,
            limiter,
            breaker,
            health,
            config,
            out,
            last_received: None,
        }
    }

    /// The limiter gating this venue's outbound calls. Shared with the
    /// executor so order traffic and ingestion traffic pace together.
    #[must_use]
    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Run until the raw tick channel closes.
    pub async fn run(mut self) {
        let venue = self.adapter.info().id.clone();
        let streaming = self.adapter.info().supports(Capability::Streaming);
        let mut reconnect_attempts: u32 = 0;

        loop {
            if self.out.is_closed() {
                debug!(venue = %venue, "tick channel closed, worker exiting");
                return;
            }

            if streaming && self.breaker.call_allowed(Instant::now()) {
                match self.adapter.subscribe().await {
                    Ok(stream) => {
                        self.breaker.record_success();
                        self.health.record_success(&venue);
                        self.health.set_circuit_state(&venue, self.breaker.state());
                        reconnect_attempts = 0;

                        let reason = self.run_stream(stream).await;
                        warn!(venue = %venue, reason = %reason, "stream lost");
                        self.breaker.record_failure(Instant::now());
                        self.health.record_error(&venue);
                    }
                    Err(err) => {
                        warn!(venue = %venue, error = %err, "stream connect failed");
                        self.breaker.record_failure(Instant::now());
                        self.health.record_error(&venue);
                    }
                }
                self.health.set_circuit_state(&venue, self.breaker.state());

                reconnect_attempts += 1;
                if reconnect_attempts > self.config.reconnect.max_attempts {
                    error!(
                        venue = %venue,
                        attempts = reconnect_attempts,
                        "reconnection attempts exhausted, falling back to polling"
                    );
                    self.poll_once().await;
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }

                let shift = reconnect_attempts.saturating_sub(1).min(16);
                let delay = self.config.reconnect.base_delay * 2u32.saturating_pow(shift);
                info!(
                    venue = %venue,
                    attempt = reconnect_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "reconnecting after delay"
                );
                tokio::time::sleep(delay).await;
            } else {
                // No stream capability, or the circuit is open: pull.
                self.poll_once().await;
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
    }

    /// Drive one live stream until it dies. Returns the reason.
    async fn run_stream(&mut self, mut stream: Box<dyn VenueStream>) -> String {
        let mut heartbeat = Heartbeat::new(self.config.heartbeat, Instant::now());
        let mut ticker = tokio::time::interval(self.config.heartbeat.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of an interval fires immediately; consume it.
        ticker.tick().await;

        loop {
            tokio::select! {
                event = stream.next() => match event {
                    Some(StreamEvent::Tick(tick)) => {
                        // Any inbound traffic proves liveness.
                        heartbeat.on_pong(Instant::now());
                        self.forward(tick).await;
                    }
                    Some(StreamEvent::Pong) => heartbeat.on_pong(Instant::now()),
                    Some(StreamEvent::Closed { reason }) => return reason,
                    None => return "stream ended".to_string(),
                },
                _ = ticker.tick() => {
                    if let Err(err) = stream.ping().await {
                        return format!("ping failed: {err}");
                    }
                    match heartbeat.on_check(Instant::now()) {
                        HeartbeatVerdict::Alive => {}
                        HeartbeatVerdict::Missed(n) => {
                            debug!(venue = %self.adapter.info().id, missed = n, "heartbeat missed");
                        }
                        HeartbeatVerdict::Failed => return "heartbeat failed".to_string(),
                    }
                }
            }
        }
    }

    /// Pull one ticker through the limiter.
    async fn poll_once(&mut self) {
        let venue = self.adapter.info().id.clone();
        if !self.breaker.call_allowed(Instant::now()) {
            return;
        }
        let adapter = Arc::clone(&self.adapter);
        let result = self
            .limiter
            .execute_with_retry(|| {
                let adapter = Arc::clone(&adapter);
                async move { adapter.fetch_ticker().await }
            })
            .await;
        match result {
            Ok(tick) => {
                self.breaker.record_success();
                self.health.record_success(&venue);
                self.forward(tick).await;
            }
            Err(err) => {
                debug!(venue = %venue, error = %err, "poll failed");
                self.breaker.record_failure(Instant::now());
                self.health.record_error(&venue);
            }
        }
        self.health.set_circuit_state(&venue, self.breaker.state());
    }

    /// Clamp `received_ts` monotone per venue and hand the tick to the hub.
    /// Under back-pressure the newest tick wins and the send never blocks.
    async fn forward(&mut self, mut tick: Tick) {
        if let Some(last) = self.last_received {
            if tick.received_ts < last {
                tick.received_ts = last;
            }
        }
        self.last_received = Some(tick.received_ts);

        if let Err(err) = self.out.try_send(tick) {
            match err {
                mpsc::error::TrySendError::Full(_) => {
                    debug!(venue = %self.adapter.info().id, "hub backlog full, dropping tick");
                }
                mpsc::error::TrySendError::Closed(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Currency, TickSource, VenueId};
    use crate::testkit::venue::MockVenue;
    use rust_decimal_macros::dec;

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(5),
                max_attempts: 2,
            },
            ..WorkerConfig::default()
        }
    }

    #[tokio::test]
    async fn poll_only_venue_forwards_ticks() {
        let venue = MockVenue::builder("north", "USDT")
            .without_streaming()
            .ticker(dec!(5.00))
            .build();
        let (tx, mut rx) = mpsc::channel(16);
        let health = Arc::new(HealthRegistry::new());
        let worker = VenueWorker::new(
            Arc::new(venue),
            fast_config(),
            Arc::clone(&health),
            EventBus::new(16),
            tx,
        );
        let handle = tokio::spawn(worker.run());

        let tick = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("tick in time")
            .expect("channel open");
        assert_eq!(tick.venue, VenueId::new("north"));
        assert_eq!(tick.price, dec!(5.00));
        handle.abort();
    }

    #[tokio::test]
    async fn received_ts_is_clamped_monotone() {
        let venue = MockVenue::builder("north", "USDT")
            .without_streaming()
            .ticker(dec!(5.00))
            .build();
        let (tx, _rx) = mpsc::channel(16);
        let mut worker = VenueWorker::new(
            Arc::new(venue),
            fast_config(),
            Arc::new(HealthRegistry::new()),
            EventBus::new(16),
            tx,
        );

        let now = Utc::now();
        let make = |ts: DateTime<Utc>| Tick {
            venue: VenueId::new("north"),
            price: dec!(5.00),
            quote: Currency::new("USDT"),
            bid: None,
            ask: None,
            last_trade_ts: ts,
            received_ts: ts,
            volume_quote_24h: None,
            source: TickSource::Poll,
        };

        worker.forward(make(now)).await;
        // An out-of-order arrival is clamped up to the watermark.
        worker.forward(make(now - chrono::Duration::seconds(5))).await;
        assert_eq!(worker.last_received, Some(now));
    }
}

//! Circuit breaker behavior driven through a real ingestion worker: a
//! venue that keeps failing trips its breaker, short-circuits further
//! calls, and recovers through the half-open probe once it answers again.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use spreadrunner::domain::VenueId;
use spreadrunner::ingest::{
    CircuitBreakerConfig, HealthRegistry, RateLimitConfig, ReconnectConfig, RetryPolicy,
    VenueWorker, WorkerConfig,
};
use spreadrunner::service::{CircuitEventState, Event, EventBus};
use spreadrunner::testkit::venue::MockVenue;
use tokio::sync::mpsc;

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        rate_limit: RateLimitConfig {
            rps: 1000.0,
            concurrency: 1,
        },
        retry: RetryPolicy {
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(10),
            max_attempts: 1,
            error_threshold: 100, // keep the limiter out of the way
            error_window: Duration::from_secs(300),
        },
        circuit: CircuitBreakerConfig {
            error_threshold: 5,
            reset_timeout: Duration::from_millis(150),
            recovery_threshold: 3,
        },
        heartbeat: Default::default(),
        reconnect: ReconnectConfig {
            base_delay: Duration::from_millis(5),
            max_attempts: 2,
        },
        poll_interval: Duration::from_millis(10),
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, deadline: Duration, check: F) {
    let start = tokio::time::Instant::now();
    while !check() {
        assert!(
            start.elapsed() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn failing_venue_opens_breaker_then_recovers() {
    // No ticker scripted: every poll fails. Streaming disabled so the
    // worker goes straight to the pull path.
    let venue = Arc::new(
        MockVenue::builder("flaky", "USDT")
            .without_streaming()
            .build(),
    );
    let (tx, mut rx) = mpsc::channel(64);
    let health = Arc::new(HealthRegistry::new());
    let events = EventBus::new(256);
    let mut event_rx = events.subscribe();

    let worker = VenueWorker::new(
        Arc::clone(&venue) as Arc<dyn spreadrunner::venue::VenueAdapter>,
        worker_config(),
        Arc::clone(&health),
        events.clone(),
        tx,
    );
    let handle = tokio::spawn(worker.run());

    // Exactly errorThreshold consecutive failures open the circuit.
    let flaky = VenueId::new("flaky");
    wait_until("circuit open", Duration::from_secs(2), || {
        health.is_open(&flaky)
    })
    .await;
    let snap = health.snapshot(&flaky);
    assert!(snap.consecutive_errors >= 5);
    assert!(snap.circuit_opened_ts.is_some());

    // The venue comes back; after the reset timeout the worker probes,
    // and three successes close the circuit again.
    venue.set_ticker(dec!(5.00));
    wait_until("circuit closed", Duration::from_secs(3), || {
        !health.is_open(&flaky)
    })
    .await;

    // Ticks flow again after recovery.
    let tick = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("tick after recovery")
        .expect("channel open");
    assert_eq!(tick.venue, flaky);

    // The transition sequence on the event stream respects the state
    // machine: never closed -> half_open directly.
    let mut transitions = Vec::new();
    while let Ok(event) = event_rx.try_recv() {
        if let Event::Circuit { state, .. } = event {
            transitions.push(state);
        }
    }
    assert!(transitions.contains(&CircuitEventState::Open));
    for pair in transitions.windows(2) {
        if pair[1] == CircuitEventState::HalfOpen {
            assert_eq!(pair[0], CircuitEventState::Open);
        }
    }

    handle.abort();
}

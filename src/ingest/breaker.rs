//! Per-venue circuit breaker.
//!
//! State machine: `Closed -> Open` on a run of consecutive failures,
//! `Open -> HalfOpen` once the reset timeout elapses (the next call is a
//! probe), `HalfOpen -> Closed` after enough consecutive successes,
//! `HalfOpen -> Open` the moment a probe fails. `Closed` never goes to
//! `HalfOpen` directly.
//!
//! Timing is injected (`Instant` parameters) so transitions are exactly
//! testable; the worker passes `Instant::now()`.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::domain::VenueId;
use crate::service::{CircuitEventState, Event, EventBus};

/// Breaker thresholds.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub error_threshold: u32,
    /// Time in `Open` before the next call may probe.
    pub reset_timeout: Duration,
    /// Consecutive probe successes that close the breaker again.
    pub recovery_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            recovery_threshold: 3,
        }
    }
}

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// One venue's breaker. Mutated only by that venue's worker.
pub struct CircuitBreaker {
    venue: VenueId,
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<Instant>,
    events: EventBus,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(venue: VenueId, config: CircuitBreakerConfig, events: EventBus) -> Self {
        Self {
            venue,
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_at: None,
            events,
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether an outbound call may proceed at `now`.
    ///
    /// While `Open`, flips to `HalfOpen` once the reset timeout since the
    /// last failure has elapsed, admitting the call as a probe.
    pub fn call_allowed(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure_at
                    .map_or(Duration::MAX, |at| now.duration_since(at));
                if elapsed >= self.config.reset_timeout {
                    self.transition(CircuitState::HalfOpen);
                    self.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        match self.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                self.consecutive_successes += 1;
                if self.consecutive_successes >= self.config.recovery_threshold {
                    self.transition(CircuitState::Closed);
                }
            }
            // A success while Open can only come from a call admitted
            // before the breaker tripped; it does not close the circuit.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call at `now`.
    pub fn record_failure(&mut self, now: Instant) {
        self.last_failure_at = Some(now);
        self.consecutive_successes = 0;
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.error_threshold {
                    self.transition(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // Probe failed: straight back to Open.
                self.consecutive_failures += 1;
                self.transition(CircuitState::Open);
            }
            CircuitState::Open => {
                self.consecutive_failures += 1;
            }
        }
    }

    fn transition(&mut self, next: CircuitState) {
        if self.state == next {
            return;
        }
        match next {
            CircuitState::Open => warn!(venue = %self.venue, "circuit opened"),
            CircuitState::HalfOpen => info!(venue = %self.venue, "circuit half-open, probing"),
            CircuitState::Closed => info!(venue = %self.venue, "circuit closed"),
        }
        self.state = next;
        self.events.emit(Event::Circuit {
            venue: self.venue.clone(),
            state: match next {
                CircuitState::Open => CircuitEventState::Open,
                CircuitState::HalfOpen => CircuitEventState::HalfOpen,
                CircuitState::Closed => CircuitEventState::Closed,
            },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            VenueId::new("north"),
            CircuitBreakerConfig::default(),
            EventBus::new(64),
        )
    }

    #[test]
    fn opens_at_exactly_error_threshold() {
        let mut b = breaker();
        let now = Instant::now();
        for _ in 0..4 {
            b.record_failure(now);
        }
        assert_eq!(b.state(), CircuitState::Closed);
        b.record_failure(now);
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn success_resets_failure_run() {
        let mut b = breaker();
        let now = Instant::now();
        for _ in 0..4 {
            b.record_failure(now);
        }
        b.record_success();
        for _ in 0..4 {
            b.record_failure(now);
        }
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn open_short_circuits_until_reset_timeout() {
        let mut b = breaker();
        let start = Instant::now();
        for _ in 0..5 {
            b.record_failure(start);
        }
        assert!(!b.call_allowed(start + Duration::from_secs(59)));
        assert_eq!(b.state(), CircuitState::Open);

        // At the timeout the next call probes.
        assert!(b.call_allowed(start + Duration::from_secs(60)));
        assert_eq!(b.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_closes_after_recovery_threshold() {
        let mut b = breaker();
        let start = Instant::now();
        for _ in 0..5 {
            b.record_failure(start);
        }
        assert!(b.call_allowed(start + Duration::from_secs(61)));

        b.record_success();
        b.record_success();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let mut b = breaker();
        let start = Instant::now();
        for _ in 0..5 {
            b.record_failure(start);
        }
        assert!(b.call_allowed(start + Duration::from_secs(61)));
        b.record_success();
        b.record_failure(start + Duration::from_secs(62));
        assert_eq!(b.state(), CircuitState::Open);

        // And the reset clock restarted from the probe failure.
        assert!(!b.call_allowed(start + Duration::from_secs(100)));
        assert!(b.call_allowed(start + Duration::from_secs(122)));
    }

    #[test]
    fn half_open_is_only_reachable_from_open() {
        // Every transition into HalfOpen in this test suite happens via
        // call_allowed on an Open breaker; a Closed breaker never yields
        // HalfOpen no matter how it is driven.
        let mut b = breaker();
        let now = Instant::now();
        assert!(b.call_allowed(now));
        b.record_success();
        b.record_failure(now);
        assert!(b.call_allowed(now + Duration::from_secs(3600)));
        assert_eq!(b.state(), CircuitState::Closed);
    }
}

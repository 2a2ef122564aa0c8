//! Venue health registry.
//!
//! Counters are mutated by each venue's worker and by the pricing gate
//! (bridge staleness); everything else reads snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::VenueId;
use crate::ingest::breaker::CircuitState;

/// Coarse health state derived from the breaker and recent errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    /// Errors seen recently, but the circuit is still closed.
    Degraded,
    /// Circuit open.
    Open,
}

/// Health snapshot for one venue.
#[derive(Debug, Clone)]
pub struct VenueHealth {
    pub state: HealthState,
    pub consecutive_errors: u32,
    pub consecutive_successes: u32,
    pub last_error_ts: Option<DateTime<Utc>>,
    pub last_success_ts: Option<DateTime<Utc>>,
    pub circuit_opened_ts: Option<DateTime<Utc>>,
    /// Raw breaker state as last reported by the worker.
    pub circuit: CircuitState,
    /// Ticks dropped because this venue's bridge rate was stale.
    pub bridge_stale_count: u64,
}

impl Default for VenueHealth {
    fn default() -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_errors: 0,
            consecutive_successes: 0,
            last_error_ts: None,
            last_success_ts: None,
            circuit_opened_ts: None,
            circuit: CircuitState::Closed,
            bridge_stale_count: 0,
        }
    }
}

/// Shared registry of per-venue health.
#[derive(Default)]
pub struct HealthRegistry {
    venues: RwLock<HashMap<VenueId, VenueHealth>>,
}

impl HealthRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, venue: &VenueId) {
        let mut venues = self.venues.write();
        let health = venues.entry(venue.clone()).or_default();
        health.consecutive_errors = 0;
        health.consecutive_successes += 1;
        health.last_success_ts = Some(Utc::now());
        if health.state == HealthState::Degraded {
            health.state = HealthState::Healthy;
        }
    }

    pub fn record_error(&self, venue: &VenueId) {
        let mut venues = self.venues.write();
        let health = venues.entry(venue.clone()).or_default();
        health.consecutive_successes = 0;
        health.consecutive_errors += 1;
        health.last_error_ts = Some(Utc::now());
        if health.state == HealthState::Healthy {
            health.state = HealthState::Degraded;
        }
    }

    /// Count a tick dropped for bridge staleness against this venue.
    pub fn record_bridge_stale(&self, venue: &VenueId) {
        let mut venues = self.venues.write();
        venues.entry(venue.clone()).or_default().bridge_stale_count += 1;
    }

    /// Mirror the breaker's state into the health view.
    pub fn set_circuit_state(&self, venue: &VenueId, state: CircuitState) {
        let mut venues = self.venues.write();
        let health = venues.entry(venue.clone()).or_default();
        health.circuit = state;
        match state {
            CircuitState::Open => {
                health.state = HealthState::Open;
                health.circuit_opened_ts = Some(Utc::now());
            }
            CircuitState::HalfOpen => {
                health.state = HealthState::Degraded;
            }
            CircuitState::Closed => {
                if health.state == HealthState::Open {
                    health.state = HealthState::Healthy;
                }
                health.circuit_opened_ts = None;
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self, venue: &VenueId) -> VenueHealth {
        self.venues.read().get(venue).cloned().unwrap_or_default()
    }

    /// Whether a venue's circuit is anything other than closed.
    #[must_use]
    pub fn is_open(&self, venue: &VenueId) -> bool {
        self.snapshot(venue).state == HealthState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_degrade_then_successes_recover() {
        let registry = HealthRegistry::new();
        let venue = VenueId::new("north");

        registry.record_error(&venue);
        assert_eq!(registry.snapshot(&venue).state, HealthState::Degraded);
        assert_eq!(registry.snapshot(&venue).consecutive_errors, 1);

        registry.record_success(&venue);
        let snap = registry.snapshot(&venue);
        assert_eq!(snap.state, HealthState::Healthy);
        assert_eq!(snap.consecutive_errors, 0);
        assert_eq!(snap.consecutive_successes, 1);
    }

    #[test]
    fn circuit_state_mirrors_into_health() {
        let registry = HealthRegistry::new();
        let venue = VenueId::new("north");

        registry.set_circuit_state(&venue, CircuitState::Open);
        assert!(registry.is_open(&venue));
        assert!(registry.snapshot(&venue).circuit_opened_ts.is_some());

        registry.set_circuit_state(&venue, CircuitState::Closed);
        assert!(!registry.is_open(&venue));
        assert!(registry.snapshot(&venue).circuit_opened_ts.is_none());
    }

    #[test]
    fn bridge_stale_counter_accumulates() {
        let registry = HealthRegistry::new();
        let venue = VenueId::new("east");
        registry.record_bridge_stale(&venue);
        registry.record_bridge_stale(&venue);
        assert_eq!(registry.snapshot(&venue).bridge_stale_count, 2);
    }

    #[test]
    fn unknown_venue_snapshot_is_default() {
        let registry = HealthRegistry::new();
        let snap = registry.snapshot(&VenueId::new("ghost"));
        assert_eq!(snap.state, HealthState::Healthy);
        assert_eq!(snap.bridge_stale_count, 0);
    }
}

//! Price ingestion fabric.
//!
//! One [`VenueWorker`] per venue multiplexes stream and poll sources; the
//! [`IngestionHub`] fans their raw ticks into a single validated,
//! normalized stream merged in arrival order. Bridge venues (canonical
//! feeds like BTC/USDT) refresh the normalizer's bridge cache before
//! anything else consumes them.

pub mod breaker;
pub mod health;
pub mod heartbeat;
pub mod limiter;
pub mod worker;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use health::{HealthRegistry, HealthState, VenueHealth};
pub use heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatVerdict};
pub use limiter::{RateLimitConfig, RateLimiter, RetryPolicy};
pub use worker::{ReconnectConfig, VenueWorker, WorkerConfig};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::{Currency, NormalizedTick, Tick, VenueId};
use crate::pricing::{PriceNormalizer, TickReject};
use crate::service::{Event, EventBus};
use crate::venue::VenueAdapter;

/// Capacity of the worker -> hub channel. Small on purpose: under
/// back-pressure the newest tick wins.
const RAW_CHANNEL_CAPACITY: usize = 256;

/// Central hub: validates, normalizes and republishes venue ticks.
pub struct IngestionHub {
    normalizer: PriceNormalizer,
    health: Arc<HealthRegistry>,
    events: EventBus,
    /// Venues whose validated ticks refresh the bridge for a currency.
    bridge_routes: HashMap<VenueId, Currency>,
    raw_rx: mpsc::Receiver<Tick>,
    out: mpsc::Sender<NormalizedTick>,
}

impl IngestionHub {
    /// Run until every worker has dropped its sender.
    pub async fn run(mut self) {
        while let Some(tick) = self.raw_rx.recv().await {
            self.process(tick);
        }
        debug!("all venue workers gone, hub exiting");
    }

    fn process(&mut self, tick: Tick) {
        let now = Utc::now();
        match self.normalizer.process(&tick, now) {
            Ok(normalized) => {
                // A validated canonical tick from a bridge venue refreshes
                // the bridge cache for its mapped currency.
                if let Some(currency) = self.bridge_routes.get(&tick.venue) {
                    self.normalizer.update_bridge(currency.clone(), tick.clone());
                }
                self.events.emit(Event::Tick(normalized.clone()));
                if self.out.try_send(normalized).is_err() {
                    debug!(venue = %tick.venue, "detector backlog full, dropping tick");
                }
            }
            Err(TickReject::BridgeStale) => {
                self.health.record_bridge_stale(&tick.venue);
                debug!(venue = %tick.venue, "tick dropped: bridge stale");
            }
            Err(reason) => {
                debug!(venue = %tick.venue, reason = %reason, "tick dropped");
            }
        }
    }
}

/// Handles onto a running fabric.
pub struct FabricHandle {
    /// Per-venue limiters, shared with the execution path.
    pub limiters: HashMap<VenueId, Arc<RateLimiter>>,
    pub tasks: Vec<JoinHandle<()>>,
}

/// Assemble and spawn the full ingestion fabric.
///
/// `bridge_routes` maps a venue to the currency its canonical-quote feed
/// bridges (e.g. the BTC/USDT feed venue -> BTC). Returns the validated
/// tick stream plus handles for shutdown.
pub fn spawn_fabric(
    adapters: Vec<Arc<dyn VenueAdapter>>,
    worker_configs: HashMap<VenueId, WorkerConfig>,
    bridge_routes: HashMap<VenueId, Currency>,
    normalizer: PriceNormalizer,
    health: Arc<HealthRegistry>,
    events: EventBus,
    out_capacity: usize,
) -> (mpsc::Receiver<NormalizedTick>, FabricHandle) {
    let (raw_tx, raw_rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);
    let (out_tx, out_rx) = mpsc::channel(out_capacity);

    let mut limiters = HashMap::new();
    let mut tasks = Vec::new();

    for adapter in adapters {
        let venue = adapter.info().id.clone();
        let config = worker_configs.get(&venue).cloned().unwrap_or_default();
        let worker = VenueWorker::new(
            adapter,
            config,
            Arc::clone(&health),
            events.clone(),
            raw_tx.clone(),
        );
        limiters.insert(venue.clone(), worker.limiter());
        info!(venue = %venue, "spawning ingestion worker");
        tasks.push(tokio::spawn(worker.run()));
    }
    drop(raw_tx);

    let hub = IngestionHub {
        normalizer,
        health,
        events,
        bridge_routes,
        raw_rx,
        out: out_tx,
    };
    tasks.push(tokio::spawn(hub.run()));

    (out_rx, FabricHandle { limiters, tasks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TickSource;
    use crate::pricing::PriceValidatorConfig;
    use rust_decimal_macros::dec;

    fn hub_parts() -> (IngestionHub, mpsc::Sender<Tick>, mpsc::Receiver<NormalizedTick>) {
        let (raw_tx, raw_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(16);
        let hub = IngestionHub {
            normalizer: PriceNormalizer::new(
                PriceValidatorConfig::default(),
                Currency::new("USDT"),
            ),
            health: Arc::new(HealthRegistry::new()),
            events: EventBus::new(16),
            bridge_routes: HashMap::from([(VenueId::new("bridge"), Currency::new("BTC"))]),
            raw_rx,
            out: out_tx,
        };
        (hub, raw_tx, out_rx)
    }

    fn tick(venue: &str, price: rust_decimal::Decimal, quote: &str) -> Tick {
        let now = Utc::now();
        Tick {
            venue: VenueId::new(venue),
            price,
            quote: Currency::new(quote),
            bid: None,
            ask: None,
            last_trade_ts: now,
            received_ts: now,
            volume_quote_24h: Some(dec!(100000)),
            source: TickSource::Stream,
        }
    }

    #[tokio::test]
    async fn hub_validates_and_forwards() {
        let (mut hub, _tx, mut out) = hub_parts();
        hub.process(tick("north", dec!(5.00), "USDT"));
        let n = out.recv().await.unwrap();
        assert_eq!(n.venue, VenueId::new("north"));
        assert_eq!(n.price, dec!(5.00));
    }

    #[tokio::test]
    async fn bridge_venue_feeds_the_normalizer() {
        let (mut hub, _tx, mut out) = hub_parts();

        // BTC-quoted tick with no bridge yet: dropped.
        hub.process(tick("east", dec!(0.0001), "BTC"));
        // Bridge venue tick arrives (canonical quote) and is forwarded too.
        hub.process(tick("bridge", dec!(50000), "USDT"));
        // Now the BTC-quoted venue normalizes.
        hub.process(tick("east", dec!(0.0001), "BTC"));

        let first = out.recv().await.unwrap();
        assert_eq!(first.venue, VenueId::new("bridge"));
        let second = out.recv().await.unwrap();
        assert_eq!(second.venue, VenueId::new("east"));
        assert_eq!(second.price, dec!(5.0000));
    }

    #[tokio::test]
    async fn stale_bridge_counts_against_venue_health() {
        let (raw_tx, raw_rx) = mpsc::channel(16);
        let (out_tx, _out_rx) = mpsc::channel(16);
        let health = Arc::new(HealthRegistry::new());
        let mut normalizer = PriceNormalizer::new(
            PriceValidatorConfig::default(),
            Currency::new("USDT"),
        );
        // Seed a bridge that is already 31s old against a 30s window.
        let mut bridge_tick = tick("bridge", dec!(50000), "USDT");
        bridge_tick.received_ts = Utc::now() - chrono::Duration::seconds(31);
        normalizer.update_bridge(Currency::new("BTC"), bridge_tick);

        let mut hub = IngestionHub {
            normalizer,
            health: Arc::clone(&health),
            events: EventBus::new(16),
            bridge_routes: HashMap::new(),
            raw_rx,
            out: out_tx,
        };
        drop(raw_tx);

        hub.process(tick("east", dec!(0.0001), "BTC"));
        assert_eq!(health.snapshot(&VenueId::new("east")).bridge_stale_count, 1);
    }
}

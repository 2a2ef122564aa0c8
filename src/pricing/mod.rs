//! Price validation and normalization.
//!
//! Every venue tick passes through sanity, deviation and freshness gates
//! before being re-quoted to the canonical currency. Rejections here are
//! expected flow control — dropped ticks are counted, not errored.
//!
//! The normalizer is the only stateful piece: a per-venue ring of recent
//! accepted prices (bounded by the validity window) and the latest bridge
//! tick per non-canonical quote currency.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::domain::{Currency, NormalizedTick, Tick, VenueId};

/// Gate thresholds. Durations in milliseconds.
#[derive(Debug, Clone)]
pub struct PriceValidatorConfig {
    pub min_price: Decimal,
    pub max_price: Decimal,
    /// Maximum relative deviation from the ring mean (0.10 = 10%).
    pub max_price_deviation: Decimal,
    /// Ring window and bridge freshness bound.
    pub price_validity_ms: u64,
    /// Maximum age of `last_trade_ts`.
    pub max_stale_price_ms: u64,
}

impl Default for PriceValidatorConfig {
    fn default() -> Self {
        Self {
            min_price: Decimal::new(1, 4),
            max_price: Decimal::from(1_000_000),
            max_price_deviation: Decimal::new(10, 2),
            price_validity_ms: 30_000,
            max_stale_price_ms: 300_000,
        }
    }
}

/// Why a tick was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickReject {
    /// Price outside `[min_price, max_price]` or non-positive.
    OutOfRange,
    /// Ask below bid.
    CrossedQuote,
    /// Too far from the venue's recent mean.
    ExcessiveDeviation,
    /// `last_trade_ts` older than the staleness bound.
    Stale,
    /// Non-canonical quote with no bridge tick seen yet.
    BridgeMissing,
    /// Bridge tick older than the validity window.
    BridgeStale,
}

impl std::fmt::Display for TickReject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::OutOfRange => "out_of_range",
            Self::CrossedQuote => "crossed_quote",
            Self::ExcessiveDeviation => "excessive_deviation",
            Self::Stale => "stale",
            Self::BridgeMissing => "bridge_missing",
            Self::BridgeStale => "bridge_stale",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Default)]
struct PriceRing {
    samples: VecDeque<(DateTime<Utc>, Decimal)>,
}

impl PriceRing {
    fn truncate(&mut self, now: DateTime<Utc>, window: Duration) {
        while let Some((ts, _)) = self.samples.front() {
            if now - *ts > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn mean(&self) -> Option<Decimal> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: Decimal = self.samples.iter().map(|(_, p)| *p).sum();
        Some(sum / Decimal::from(self.samples.len() as u64))
    }

    fn push(&mut self, ts: DateTime<Utc>, price: Decimal) {
        self.samples.push_back((ts, price));
    }
}

/// Validating normalizer. One instance serves all venues; the hub owns it.
pub struct PriceNormalizer {
    config: PriceValidatorConfig,
    canonical: Currency,
    rings: HashMap<VenueId, PriceRing>,
    /// Latest validated bridge tick per non-canonical quote currency.
    bridges: HashMap<Currency, Tick>,
}

impl PriceNormalizer {
    #[must_use]
    pub fn new(config: PriceValidatorConfig, canonical: Currency) -> Self {
        Self {
            config,
            canonical,
            rings: HashMap::new(),
            bridges: HashMap::new(),
        }
    }

    /// Record a validated canonical-quote tick as the bridge for `currency`
    /// (e.g. the BTC/USDT feed that re-quotes BTC-denominated venues).
    pub fn update_bridge(&mut self, currency: Currency, tick: Tick) {
        self.bridges.insert(currency, tick);
    }

    /// Latest bridge tick for a currency, if any.
    #[must_use]
    pub fn bridge(&self, currency: &Currency) -> Option<&Tick> {
        self.bridges.get(currency)
    }

    /// Validate and normalize one tick at `now`.
    ///
    /// On acceptance the native price is appended to the venue's ring; a
    /// rejected tick leaves no trace beyond the reject reason.
    pub fn process(&mut self, tick: &Tick, now: DateTime<Utc>) -> Result<NormalizedTick, TickReject> {
        // Sanity: bounds are inclusive on both ends.
        if tick.price <= Decimal::ZERO
            || tick.price < self.config.min_price
            || tick.price > self.config.max_price
        {
            return Err(TickReject::OutOfRange);
        }
        if !tick.spread_is_sane() {
            return Err(TickReject::CrossedQuote);
        }

        // Deviation against the venue's recent mean, when a window exists.
        let window = Duration::milliseconds(self.config.price_validity_ms as i64);
        let ring = self.rings.entry(tick.venue.clone()).or_default();
        ring.truncate(now, window);
        if let Some(mean) = ring.mean() {
            if !mean.is_zero() {
                let deviation = ((tick.price - mean) / mean).abs();
                if deviation > self.config.max_price_deviation {
                    debug!(
                        venue = %tick.venue,
                        price = %tick.price,
                        mean = %mean,
                        "tick rejected: deviation"
                    );
                    return Err(TickReject::ExcessiveDeviation);
                }
            }
        }

        // Freshness of the venue-reported trade time.
        let max_stale = Duration::milliseconds(self.config.max_stale_price_ms as i64);
        if now - tick.last_trade_ts > max_stale {
            return Err(TickReject::Stale);
        }

        // Normalization through the bridge for non-canonical quotes.
        let normalized = if tick.quote == self.canonical {
            NormalizedTick::passthrough(tick)
        } else {
            let bridge = self
                .bridges
                .get(&tick.quote)
                .ok_or(TickReject::BridgeMissing)?;
            if now - bridge.received_ts > window {
                return Err(TickReject::BridgeStale);
            }
            NormalizedTick::bridged(tick, bridge)
        };

        // History update happens only for accepted ticks.
        self.rings
            .entry(tick.venue.clone())
            .or_default()
            .push(tick.received_ts, tick.price);

        Ok(normalized)
    }

    /// Number of ring samples currently held for a venue.
    #[must_use]
    pub fn ring_len(&self, venue: &VenueId) -> usize {
        self.rings.get(venue).map_or(0, |r| r.samples.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TickSource;
    use rust_decimal_macros::dec;

    fn config() -> PriceValidatorConfig {
        PriceValidatorConfig {
            min_price: dec!(0.01),
            max_price: dec!(100),
            max_price_deviation: dec!(0.10),
            price_validity_ms: 30_000,
            max_stale_price_ms: 300_000,
        }
    }

    fn tick_at(venue: &str, price: Decimal, quote: &str, now: DateTime<Utc>) -> Tick {
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

    fn normalizer() -> PriceNormalizer {
        PriceNormalizer::new(config(), Currency::new("USDT"))
    }

    #[test]
    fn canonical_tick_passes_through() {
        let mut n = normalizer();
        let now = Utc::now();
        let tick = tick_at("north", dec!(5.00), "USDT", now);
        let out = n.process(&tick, now).unwrap();
        assert_eq!(out.price, dec!(5.00));
        assert_eq!(n.ring_len(&VenueId::new("north")), 1);
    }

    #[test]
    fn price_at_max_is_accepted_and_above_rejected() {
        let mut n = normalizer();
        let now = Utc::now();
        assert!(n.process(&tick_at("north", dec!(100), "USDT", now), now).is_ok());
        assert_eq!(
            n.process(&tick_at("north", dec!(100.0001), "USDT", now), now),
            Err(TickReject::OutOfRange)
        );
    }

    #[test]
    fn non_positive_and_below_min_rejected() {
        let mut n = normalizer();
        let now = Utc::now();
        assert_eq!(
            n.process(&tick_at("north", dec!(0), "USDT", now), now),
            Err(TickReject::OutOfRange)
        );
        assert_eq!(
            n.process(&tick_at("north", dec!(0.001), "USDT", now), now),
            Err(TickReject::OutOfRange)
        );
    }

    #[test]
    fn crossed_quote_rejected() {
        let mut n = normalizer();
        let now = Utc::now();
        let mut tick = tick_at("north", dec!(5.00), "USDT", now);
        tick.bid = Some(dec!(5.05));
        tick.ask = Some(dec!(5.00));
        assert_eq!(n.process(&tick, now), Err(TickReject::CrossedQuote));
    }

    #[test]
    fn deviation_beyond_bound_rejected() {
        let mut n = normalizer();
        let now = Utc::now();
        n.process(&tick_at("north", dec!(5.00), "USDT", now), now)
            .unwrap();

        // 10% of 5.00 is 0.50: 5.50 passes, 5.51 fails.
        assert!(n
            .process(&tick_at("north", dec!(5.50), "USDT", now), now)
            .is_ok());

        let mut n = normalizer();
        n.process(&tick_at("north", dec!(5.00), "USDT", now), now)
            .unwrap();
        assert_eq!(
            n.process(&tick_at("north", dec!(5.51), "USDT", now), now),
            Err(TickReject::ExcessiveDeviation)
        );
    }

    #[test]
    fn deviation_skipped_with_empty_ring() {
        let mut n = normalizer();
        let now = Utc::now();
        // First tick has no window to deviate from.
        assert!(n.process(&tick_at("lone", dec!(42), "USDT", now), now).is_ok());
    }

    #[test]
    fn stale_trade_time_rejected() {
        let mut n = normalizer();
        let now = Utc::now();
        let mut tick = tick_at("north", dec!(5.00), "USDT", now);
        tick.last_trade_ts = now - Duration::minutes(6);
        assert_eq!(n.process(&tick, now), Err(TickReject::Stale));
    }

    #[test]
    fn ring_drops_samples_outside_window() {
        let mut n = normalizer();
        let now = Utc::now();
        n.process(&tick_at("north", dec!(5.00), "USDT", now), now)
            .unwrap();
        // 40s later the old sample is outside the 30s window, so a large
        // move no longer trips the deviation gate.
        let later = now + Duration::seconds(40);
        assert!(n
            .process(&tick_at("north", dec!(9.00), "USDT", later), later)
            .is_ok());
    }

    #[test]
    fn bridged_quote_requires_bridge() {
        let mut n = normalizer();
        let now = Utc::now();
        let tick = tick_at("east", dec!(0.0001), "BTC", now);
        assert_eq!(n.process(&tick, now), Err(TickReject::BridgeMissing));

        n.update_bridge(Currency::new("BTC"), tick_at("bridge", dec!(50000), "USDT", now));
        let out = n.process(&tick, now).unwrap();
        assert_eq!(out.price, dec!(5.0000));
    }

    #[test]
    fn stale_bridge_rejects_normalization() {
        let mut n = normalizer();
        let now = Utc::now();
        // Bridge received 31s ago with a 30s validity window.
        let old = now - Duration::seconds(31);
        n.update_bridge(Currency::new("BTC"), tick_at("bridge", dec!(50000), "USDT", old));

        let tick = tick_at("east", dec!(0.0001), "BTC", now);
        assert_eq!(n.process(&tick, now), Err(TickReject::BridgeStale));
        // Nothing entered the ring for the rejected tick.
        assert_eq!(n.ring_len(&VenueId::new("east")), 0);
    }
}

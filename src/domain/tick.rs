//! Price tick types.
//!
//! A [`Tick`] is a venue-native price observation; a [`NormalizedTick`] is
//! the same observation re-quoted to the canonical quote currency. Ticks
//! are ephemeral: they live in per-venue rings bounded by the configured
//! price validity window.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::VenueId;
use super::money::{Currency, Price};

/// How a tick reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickSource {
    /// Pushed over the venue's streaming feed.
    Stream,
    /// Pulled via the REST fallback.
    Poll,
}

/// A venue-native price observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Venue the observation came from.
    pub venue: VenueId,
    /// Last traded price in the venue's own quote currency.
    pub price: Price,
    /// Quote currency the venue trades in.
    pub quote: Currency,
    /// Best bid, when the venue reports one.
    pub bid: Option<Price>,
    /// Best ask, when the venue reports one.
    pub ask: Option<Price>,
    /// Venue-reported time of the last trade.
    pub last_trade_ts: DateTime<Utc>,
    /// When our worker received the observation. Monotone per venue.
    pub received_ts: DateTime<Utc>,
    /// 24h traded volume in quote currency, when reported.
    pub volume_quote_24h: Option<Decimal>,
    /// Stream or poll origin.
    pub source: TickSource,
}

impl Tick {
    /// `ask >= bid` must hold when both sides are present.
    #[must_use]
    pub fn spread_is_sane(&self) -> bool {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => ask >= bid,
            _ => true,
        }
    }
}

/// A tick re-quoted to the canonical quote currency.
///
/// Carries the bridge tick's `received_ts` so freshness checks downstream
/// see the *older* of the two observations that produced the price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTick {
    pub venue: VenueId,
    /// Price in the canonical quote currency.
    pub price: Price,
    pub bid: Option<Price>,
    pub ask: Option<Price>,
    pub last_trade_ts: DateTime<Utc>,
    /// `min(tick.received_ts, bridge.received_ts)` — the binding freshness.
    pub received_ts: DateTime<Utc>,
    pub volume_quote_24h: Option<Decimal>,
    pub source: TickSource,
}

impl NormalizedTick {
    /// A tick already quoted in the canonical currency passes through
    /// with its own timestamps.
    #[must_use]
    pub fn passthrough(tick: &Tick) -> Self {
        Self {
            venue: tick.venue.clone(),
            price: tick.price,
            bid: tick.bid,
            ask: tick.ask,
            last_trade_ts: tick.last_trade_ts,
            received_ts: tick.received_ts,
            volume_quote_24h: tick.volume_quote_24h,
            source: tick.source,
        }
    }

    /// Re-quote `tick` through `bridge` (a canonical-quoted tick for the
    /// tick's quote currency, e.g. BTC/USDT for a BTC-quoted venue).
    #[must_use]
    pub fn bridged(tick: &Tick, bridge: &Tick) -> Self {
        let rate = bridge.price;
        Self {
            venue: tick.venue.clone(),
            price: tick.price * rate,
            bid: tick.bid.map(|b| b * rate),
            ask: tick.ask.map(|a| a * rate),
            last_trade_ts: tick.last_trade_ts,
            received_ts: tick.received_ts.min(bridge.received_ts),
            // Volume is reported in the venue's quote currency; convert too.
            volume_quote_24h: tick.volume_quote_24h.map(|v| v * rate),
            source: tick.source,
        }
    }

    /// Age of this observation at `now`.
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.received_ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn tick(venue: &str, price: Decimal, quote: &str) -> Tick {
        let now = Utc::now();
        Tick {
            venue: VenueId::new(venue),
            price,
            quote: Currency::new(quote),
            bid: Some(price - dec!(0.01)),
            ask: Some(price + dec!(0.01)),
            last_trade_ts: now,
            received_ts: now,
            volume_quote_24h: Some(dec!(50000)),
            source: TickSource::Stream,
        }
    }

    #[test]
    fn spread_sanity() {
        let mut t = tick("north", dec!(5), "USDT");
        assert!(t.spread_is_sane());
        t.bid = Some(dec!(5.10));
        t.ask = Some(dec!(5.00));
        assert!(!t.spread_is_sane());
        t.ask = None;
        assert!(t.spread_is_sane());
    }

    #[test]
    fn passthrough_keeps_timestamps() {
        let t = tick("north", dec!(5), "USDT");
        let n = NormalizedTick::passthrough(&t);
        assert_eq!(n.price, dec!(5));
        assert_eq!(n.received_ts, t.received_ts);
    }

    #[test]
    fn bridged_rescales_price_and_sides() {
        let t = tick("east", dec!(0.0001), "BTC");
        let bridge = tick("bridge", dec!(50000), "USDT");
        let n = NormalizedTick::bridged(&t, &bridge);
        assert_eq!(n.price, dec!(5.0000));
        assert_eq!(n.bid, Some((dec!(0.0001) - dec!(0.01)) * dec!(50000)));
        assert_eq!(n.volume_quote_24h, Some(dec!(50000) * dec!(50000)));
    }

    #[test]
    fn bridged_takes_older_received_ts() {
        let mut t = tick("east", dec!(0.0001), "BTC");
        let mut bridge = tick("bridge", dec!(50000), "USDT");
        bridge.received_ts = t.received_ts - Duration::seconds(10);
        let n = NormalizedTick::bridged(&t, &bridge);
        assert_eq!(n.received_ts, bridge.received_ts);

        // And the other way around.
        bridge.received_ts = t.received_ts + Duration::seconds(10);
        t.received_ts = bridge.received_ts - Duration::seconds(20);
        let n = NormalizedTick::bridged(&t, &bridge);
        assert_eq!(n.received_ts, t.received_ts);
    }
}

//! Cross-venue opportunity detection.
//!
//! Keeps the latest normalized tick per venue behind an aging mask and, on
//! each update of venue `v`, evaluates only the pairs `(v, w)` and
//! `(w, v)` — O(N) work per tick instead of all pairs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::domain::{
    FeeSchedule, NormalizedTick, Opportunity, OpportunityId, RejectReason, VenueId,
};
use crate::ledger::Ledger;
use crate::service::{Event, EventBus};

/// Detection thresholds.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Minimum `(sell - buy) / buy` to consider a candidate (0.005 = 0.5%).
    pub min_spread_pct: Decimal,
    /// Minimum 24h quote volume on both venues.
    pub min_volume_quote: Decimal,
    /// Minimum estimated net profit, canonical quote.
    pub min_profit_quote: Decimal,
    /// Ticks older than this are masked out of detection.
    pub max_tick_age: Duration,
    /// Pessimistic slippage haircut applied pre-validation.
    pub max_slippage: Decimal,
    /// Opportunities emitted per evaluation, best first.
    pub top_k: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_spread_pct: Decimal::new(5, 3),
            min_volume_quote: Decimal::from(1000),
            min_profit_quote: Decimal::ONE,
            max_tick_age: Duration::from_secs(5),
            max_slippage: Decimal::new(3, 3),
            top_k: 5,
        }
    }
}

/// Stateful detector fed by the ingestion hub's output.
pub struct OpportunityDetector {
    config: DetectorConfig,
    ledger: Arc<Ledger>,
    /// Taker rates per venue, loaded at startup.
    fees: HashMap<VenueId, FeeSchedule>,
    latest: HashMap<VenueId, NormalizedTick>,
    events: EventBus,
}

impl OpportunityDetector {
    #[must_use]
    pub fn new(
        config: DetectorConfig,
        ledger: Arc<Ledger>,
        fees: HashMap<VenueId, FeeSchedule>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            ledger,
            fees,
            latest: HashMap::new(),
            events,
        }
    }

    /// Ingest one tick and return the top candidates it produced, ordered
    /// by estimated net descending (ties break on earlier expiry).
    pub fn on_tick(&mut self, tick: NormalizedTick, now: DateTime<Utc>) -> Vec<Opportunity> {
        let venue = tick.venue.clone();
        self.latest.insert(venue.clone(), tick);

        let max_age = chrono::Duration::from_std(self.config.max_tick_age)
            .unwrap_or_else(|_| chrono::Duration::seconds(5));

        let updated = self.latest.get(&venue).cloned();
        let Some(updated) = updated else {
            return Vec::new();
        };
        if now - updated.received_ts > max_age {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        let others: Vec<NormalizedTick> = self
            .latest
            .values()
            .filter(|t| t.venue != venue && now - t.received_ts <= max_age)
            .cloned()
            .collect();

        for other in &others {
            if let Some(opp) = self.evaluate(&updated, other, now) {
                candidates.push(opp);
            }
            if let Some(opp) = self.evaluate(other, &updated, now) {
                candidates.push(opp);
            }
        }

        candidates.sort_by(|a, b| {
            b.est_net
                .cmp(&a.est_net)
                .then_with(|| a.expires_ts.cmp(&b.expires_ts))
        });
        candidates.truncate(self.config.top_k);

        for opp in &candidates {
            self.events.emit(Event::Opportunity(opp.clone()));
        }
        candidates
    }

    /// Evaluate one directed candidate: buy on `buy_tick.venue`, sell on
    /// `sell_tick.venue`.
    fn evaluate(
        &self,
        buy_tick: &NormalizedTick,
        sell_tick: &NormalizedTick,
        now: DateTime<Utc>,
    ) -> Option<Opportunity> {
        let buy_price = buy_tick.ask.unwrap_or(buy_tick.price);
        let sell_price = sell_tick.bid.unwrap_or(sell_tick.price);
        if buy_price <= Decimal::ZERO || sell_price <= buy_price {
            return None;
        }

        let spread_pct = (sell_price - buy_price) / buy_price;
        if spread_pct < self.config.min_spread_pct {
            // Sub-threshold spreads are not candidates; stay quiet.
            return None;
        }

        let pair = (buy_tick.venue.clone(), sell_tick.venue.clone());

        let volume = match (buy_tick.volume_quote_24h, sell_tick.volume_quote_24h) {
            (Some(b), Some(s)) => b.min(s),
            _ => Decimal::ZERO,
        };
        if volume < self.config.min_volume_quote {
            self.reject(pair, RejectReason::VolumeBelowMinimum);
            return None;
        }

        // Position sizing: single-position cap bounded by exposure headroom.
        let limits = self.ledger.limits();
        let headroom = limits.max_total_exposure - self.ledger.total_exposure();
        let notional = limits.max_position_size.min(headroom);
        if notional <= Decimal::ZERO {
            self.reject(pair, RejectReason::NoExposureHeadroom);
            return None;
        }

        let taker_sum = self.taker(&buy_tick.venue) + self.taker(&sell_tick.venue);
        let est_gross = notional * spread_pct;
        let est_fees = notional * taker_sum;
        let est_slippage = notional * self.config.max_slippage;
        let est_net = est_gross - est_fees - est_slippage;
        if est_net < self.config.min_profit_quote {
            self.reject(pair, RejectReason::ProfitBelowMinimum);
            return None;
        }

        let base_amount = notional / buy_price;
        let expires_ts = buy_tick.received_ts.min(sell_tick.received_ts)
            + chrono::Duration::from_std(self.config.max_tick_age)
                .unwrap_or_else(|_| chrono::Duration::seconds(5));

        debug!(
            buy = %buy_tick.venue,
            sell = %sell_tick.venue,
            spread_pct = %spread_pct,
            est_net = %est_net,
            "candidate found"
        );

        Some(Opportunity {
            id: OpportunityId::new(),
            buy_venue: buy_tick.venue.clone(),
            sell_venue: sell_tick.venue.clone(),
            buy_price,
            sell_price,
            spread_pct,
            base_amount,
            notional_quote: notional,
            est_gross,
            est_fees,
            est_slippage,
            est_net,
            created_ts: now,
            expires_ts,
        })
    }

    fn taker(&self, venue: &VenueId) -> Decimal {
        self.fees
            .get(venue)
            .copied()
            .unwrap_or_default()
            .taker
    }

    fn reject(&self, pair: (VenueId, VenueId), reason: RejectReason) {
        self.events.emit(Event::OpportunityRejected {
            venue_pair: Some(pair),
            reason,
        });
    }

    /// Latest unmasked tick for a venue, if fresh at `now`.
    #[must_use]
    pub fn fresh_tick(&self, venue: &VenueId, now: DateTime<Utc>) -> Option<&NormalizedTick> {
        let max_age = chrono::Duration::from_std(self.config.max_tick_age)
            .unwrap_or_else(|_| chrono::Duration::seconds(5));
        self.latest
            .get(venue)
            .filter(|t| now - t.received_ts <= max_age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Currency, TickSource};
    use crate::ledger::RiskLimits;
    use crate::service::EventBus;
    use rust_decimal_macros::dec;

    fn ledger() -> Arc<Ledger> {
        Arc::new(Ledger::new(
            Currency::new("TON"),
            Currency::new("USDT"),
            RiskLimits {
                max_position_size: dec!(500),
                max_total_exposure: dec!(10000),
                ..RiskLimits::default()
            },
            EventBus::new(64),
        ))
    }

    fn fees() -> HashMap<VenueId, FeeSchedule> {
        HashMap::from([
            (VenueId::new("north"), FeeSchedule::new(dec!(0.001), dec!(0.002))),
            (VenueId::new("east"), FeeSchedule::new(dec!(0.001), dec!(0.002))),
        ])
    }

    fn detector() -> OpportunityDetector {
        OpportunityDetector::new(
            DetectorConfig {
                min_spread_pct: dec!(0.005),
                min_volume_quote: dec!(1000),
                min_profit_quote: dec!(1),
                max_tick_age: Duration::from_secs(5),
                max_slippage: dec!(0.003),
                top_k: 5,
            },
            ledger(),
            fees(),
            EventBus::new(64),
        )
    }

    fn tick(venue: &str, bid: Decimal, ask: Decimal, at: DateTime<Utc>) -> NormalizedTick {
        NormalizedTick {
            venue: VenueId::new(venue),
            price: (bid + ask) / dec!(2),
            bid: Some(bid),
            ask: Some(ask),
            last_trade_ts: at,
            received_ts: at,
            volume_quote_24h: Some(dec!(100000)),
            source: TickSource::Stream,
        }
    }

    #[test]
    fn detects_profitable_spread() {
        let mut d = detector();
        let now = Utc::now();
        d.on_tick(tick("north", dec!(4.99), dec!(5.00), now), now);
        let opps = d.on_tick(tick("east", dec!(5.05), dec!(5.06), now), now);

        assert_eq!(opps.len(), 1);
        let opp = &opps[0];
        assert_eq!(opp.buy_venue, VenueId::new("north"));
        assert_eq!(opp.sell_venue, VenueId::new("east"));
        assert_eq!(opp.buy_price, dec!(5.00));
        assert_eq!(opp.sell_price, dec!(5.05));
        assert_eq!(opp.spread_pct, dec!(0.01));
        // notional 500: gross 5.00, fees 500*0.004=2.00, slip 500*0.003=1.50
        assert_eq!(opp.est_net, dec!(1.50));
        assert!(opp.sell_price > opp.buy_price);
        assert!(opp.est_net >= dec!(1));
        assert!(now <= opp.expires_ts);
    }

    #[test]
    fn sub_threshold_spread_is_ignored() {
        let mut d = detector();
        let now = Utc::now();
        d.on_tick(tick("north", dec!(4.99), dec!(5.00), now), now);
        // 0.4% spread < 0.5% minimum.
        let opps = d.on_tick(tick("east", dec!(5.02), dec!(5.03), now), now);
        assert!(opps.is_empty());
    }

    #[test]
    fn low_volume_rejected() {
        let mut d = detector();
        let now = Utc::now();
        let mut thin = tick("north", dec!(4.99), dec!(5.00), now);
        thin.volume_quote_24h = Some(dec!(500));
        d.on_tick(thin, now);
        let opps = d.on_tick(tick("east", dec!(5.05), dec!(5.06), now), now);
        assert!(opps.is_empty());
    }

    #[test]
    fn stale_ticks_are_masked() {
        let mut d = detector();
        let now = Utc::now();
        let old = now - chrono::Duration::seconds(6);
        d.on_tick(tick("north", dec!(4.99), dec!(5.00), old), old);
        // North's tick is 6s old under a 5s mask: no pairs to evaluate.
        let opps = d.on_tick(tick("east", dec!(5.05), dec!(5.06), now), now);
        assert!(opps.is_empty());
    }

    #[test]
    fn expiry_is_older_leg_plus_max_age() {
        let mut d = detector();
        let now = Utc::now();
        let earlier = now - chrono::Duration::seconds(2);
        d.on_tick(tick("north", dec!(4.99), dec!(5.00), earlier), earlier);
        let opps = d.on_tick(tick("east", dec!(5.05), dec!(5.06), now), now);
        assert_eq!(opps[0].expires_ts, earlier + chrono::Duration::seconds(5));
    }

    #[test]
    fn both_directions_evaluated() {
        let mut d = detector();
        let now = Utc::now();
        // east is cheap, north is rich: buy east, sell north.
        d.on_tick(tick("east", dec!(4.99), dec!(5.00), now), now);
        let opps = d.on_tick(tick("north", dec!(5.05), dec!(5.06), now), now);
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].buy_venue, VenueId::new("east"));
        assert_eq!(opps[0].sell_venue, VenueId::new("north"));
    }

    #[test]
    fn top_k_orders_by_net_descending() {
        let mut d = detector();
        let now = Utc::now();
        d.on_tick(tick("north", dec!(4.99), dec!(5.00), now), now);
        d.on_tick(tick("east", dec!(5.05), dec!(5.06), now), now);
        // west is even richer: selling there works from both cheaper books.
        let opps = d.on_tick(tick("west", dec!(5.15), dec!(5.16), now), now);

        assert_eq!(opps.len(), 2);
        assert_eq!(opps[0].sell_venue, VenueId::new("west"));
        assert_eq!(opps[0].buy_venue, VenueId::new("north"));
        assert_eq!(opps[1].buy_venue, VenueId::new("east"));
        assert!(opps[0].est_net >= opps[1].est_net);
    }

    #[test]
    fn no_headroom_rejects() {
        let ledger = Arc::new(Ledger::new(
            Currency::new("TON"),
            Currency::new("USDT"),
            RiskLimits {
                max_position_size: dec!(500),
                max_total_exposure: dec!(100),
                ..RiskLimits::default()
            },
            EventBus::new(64),
        ));
        // Exhaust the headroom with an open position.
        ledger.open_position(&VenueId::new("north"), crate::domain::Side::Buy, dec!(20), dec!(5.00));

        let mut d = OpportunityDetector::new(
            DetectorConfig::default(),
            ledger,
            fees(),
            EventBus::new(64),
        );
        let now = Utc::now();
        d.on_tick(tick("north", dec!(4.99), dec!(5.00), now), now);
        let opps = d.on_tick(tick("east", dec!(5.05), dec!(5.06), now), now);
        assert!(opps.is_empty());
    }
}

//! Pre-execution opportunity validation.
//!
//! The detector works from cached top-of-book; this gate re-checks against
//! live state fetched at validation time. Depth is walked on both sides,
//! the plan is shrunk to what books and balances can actually carry, and
//! profitability is recomputed from depth-derived average fills. Only a
//! plan that survives all of it reaches the executor.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::debug;

use crate::domain::{FeeSchedule, Opportunity, RejectReason, VenueId};
use crate::ingest::{CircuitState, HealthRegistry, RateLimiter};
use crate::ledger::Ledger;
use crate::service::{Event, EventBus, LimitKind};
use crate::venue::VenueAdapter;

/// Validation thresholds.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Maximum realized slippage per side (0.003 = 0.3%).
    pub max_slippage: Decimal,
    /// Minimum net profit after depth-derived fees.
    pub min_profit_quote: Decimal,
    /// Safety margin on the quote balance reserved for fees.
    pub fee_buffer: Decimal,
    /// Depth levels fetched per side.
    pub depth_levels: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_slippage: Decimal::new(3, 3),
            min_profit_quote: Decimal::ONE,
            fee_buffer: Decimal::new(1, 2),
            depth_levels: 20,
        }
    }
}

/// An opportunity that survived validation, possibly shrunk.
#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    pub opportunity: Opportunity,
    /// Base amount after depth and balance adjustments.
    pub base_amount: Decimal,
    /// Depth-derived average buy fill.
    pub buy_avg_price: Decimal,
    /// Depth-derived average sell fill.
    pub sell_avg_price: Decimal,
    /// Net estimate recomputed from the walks.
    pub est_net: Decimal,
}

/// Live-state gate in front of the executor.
pub struct OpportunityValidator {
    config: ValidatorConfig,
    adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
    limiters: HashMap<VenueId, Arc<RateLimiter>>,
    fees: HashMap<VenueId, FeeSchedule>,
    ledger: Arc<Ledger>,
    health: Arc<HealthRegistry>,
    events: EventBus,
}

impl OpportunityValidator {
    #[must_use]
    pub fn new(
        config: ValidatorConfig,
        adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
        limiters: HashMap<VenueId, Arc<RateLimiter>>,
        fees: HashMap<VenueId, FeeSchedule>,
        ledger: Arc<Ledger>,
        health: Arc<HealthRegistry>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            adapters,
            limiters,
            fees,
            ledger,
            health,
            events,
        }
    }

    /// Validate `opportunity` against live state.
    ///
    /// Rejection is flow control: the reason is emitted as an event and
    /// returned, never as an error.
    pub async fn validate(&self, opportunity: &Opportunity) -> Result<ValidatedPlan, RejectReason> {
        match self.validate_inner(opportunity).await {
            Ok(plan) => Ok(plan),
            Err(reason) => {
                self.events.emit(Event::OpportunityRejected {
                    venue_pair: Some(opportunity.pair()),
                    reason: reason.clone(),
                });
                Err(reason)
            }
        }
    }

    async fn validate_inner(
        &self,
        opportunity: &Opportunity,
    ) -> Result<ValidatedPlan, RejectReason> {
        // Freshness first: nothing else matters for a dead opportunity.
        if !opportunity.is_live(Utc::now()) {
            return Err(RejectReason::Expired);
        }

        // Both breakers must be fully closed, not probing.
        for venue in [&opportunity.buy_venue, &opportunity.sell_venue] {
            if self.health.snapshot(venue).circuit != CircuitState::Closed {
                return Err(RejectReason::VenueUnhealthy);
            }
        }

        // Live depth, re-fetched rather than cached.
        let buy_depth = self
            .fetch_depth(&opportunity.buy_venue)
            .await
            .ok_or(RejectReason::InsufficientDepth)?;
        let sell_depth = self
            .fetch_depth(&opportunity.sell_venue)
            .await
            .ok_or(RejectReason::InsufficientDepth)?;

        // Top-of-book movement against us beyond the slippage bound.
        let cur_ask = buy_depth
            .best_ask()
            .map(|l| l.price())
            .ok_or(RejectReason::InsufficientDepth)?;
        let cur_bid = sell_depth
            .best_bid()
            .map(|l| l.price())
            .ok_or(RejectReason::InsufficientDepth)?;
        if (cur_ask - opportunity.buy_price) / opportunity.buy_price > self.config.max_slippage {
            return Err(RejectReason::PriceMoved);
        }
        if (opportunity.sell_price - cur_bid) / opportunity.sell_price > self.config.max_slippage {
            return Err(RejectReason::PriceMoved);
        }

        // Shrink to what both books absorb, then to what balances allow.
        let requested = opportunity.base_amount;
        let buy_probe = buy_depth.simulate_buy(requested);
        let sell_probe = sell_depth.simulate_sell(requested);
        let mut base_amount = requested
            .min(buy_probe.filled_base)
            .min(sell_probe.filled_base);
        if base_amount <= Decimal::ZERO {
            return Err(RejectReason::InsufficientDepth);
        }

        let quote_available = self
            .ledger
            .available(&opportunity.buy_venue, self.ledger.quote_currency());
        let base_available = self
            .ledger
            .available(&opportunity.sell_venue, self.ledger.base_currency());
        let quote_cap_base = quote_available
            / (opportunity.buy_price * (Decimal::ONE + self.config.fee_buffer));
        base_amount = base_amount.min(base_available).min(quote_cap_base);
        if base_amount <= Decimal::ZERO {
            return Err(RejectReason::InsufficientBalance);
        }

        // Re-walk at the adjusted size for the real averages.
        let buy_fill = buy_depth.simulate_buy(base_amount);
        let sell_fill = sell_depth.simulate_sell(base_amount);
        if !buy_fill.absorbed(base_amount) || !sell_fill.absorbed(base_amount) {
            return Err(RejectReason::InsufficientDepth);
        }
        if buy_fill.slippage_vs(cur_ask) > self.config.max_slippage
            || sell_fill.slippage_vs(cur_bid) > self.config.max_slippage
        {
            return Err(RejectReason::SlippageExceeded);
        }

        // Profit recomputed from depth-derived averages.
        let fees = buy_fill.quote_total * self.taker(&opportunity.buy_venue)
            + sell_fill.quote_total * self.taker(&opportunity.sell_venue);
        let est_net = sell_fill.quote_total - buy_fill.quote_total - fees;
        if est_net < self.config.min_profit_quote {
            return Err(RejectReason::ProfitBelowMinimum);
        }

        // Exposure caps on the adjusted notional: total, daily, and the
        // per-venue position count that a failed leg would add to.
        let notional = buy_fill.quote_total;
        if !self
            .ledger
            .check_limit(LimitKind::Exposure, notional, "pre-execution validation")
        {
            return Err(RejectReason::ExposureExceeded);
        }
        let limits = self.ledger.limits();
        if self.ledger.daily_stats().volume_quote + notional > limits.max_daily_exposure {
            return Err(RejectReason::ExposureExceeded);
        }
        if self.ledger.open_positions_on(&opportunity.buy_venue) >= limits.max_positions_per_venue
        {
            return Err(RejectReason::TooManyPositions);
        }

        debug!(
            opportunity = %opportunity.id,
            base = %base_amount,
            est_net = %est_net,
            "opportunity validated"
        );

        Ok(ValidatedPlan {
            opportunity: opportunity.clone(),
            base_amount,
            buy_avg_price: buy_fill.avg_price,
            sell_avg_price: sell_fill.avg_price,
            est_net,
        })
    }

    async fn fetch_depth(&self, venue: &VenueId) -> Option<crate::domain::OrderBookDepth> {
        let adapter = Arc::clone(self.adapters.get(venue)?);
        let levels = self.config.depth_levels;
        let result = match self.limiters.get(venue) {
            Some(limiter) => {
                limiter
                    .execute_with_retry(|| {
                        let adapter = Arc::clone(&adapter);
                        async move { adapter.fetch_depth(levels).await }
                    })
                    .await
            }
            None => adapter.fetch_depth(levels).await,
        };
        match result {
            Ok(depth) => Some(depth),
            Err(err) => {
                debug!(venue = %venue, error = %err, "depth fetch failed");
                None
            }
        }
    }

    fn taker(&self, venue: &VenueId) -> Decimal {
        self.fees.get(venue).copied().unwrap_or_default().taker
    }
}

//! Cross-venue arbitrage opportunities.
//!
//! An [`Opportunity`] is a priced plan: buy `base_amount` on `buy_venue`,
//! sell it on `sell_venue`, with profit estimates net of taker fees and a
//! pessimistic slippage haircut. Every emitted opportunity satisfies
//! `sell_price > buy_price` and `est_net >= min_profit_quote`; a stale
//! opportunity (past `expires_ts`) must never reach the executor.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{OpportunityId, VenueId};
use super::money::{Amount, Price};

/// A detected cross-venue spread with positive estimated net profit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: OpportunityId,
    pub buy_venue: VenueId,
    pub sell_venue: VenueId,
    /// Ask on the buy venue, canonical quote.
    pub buy_price: Price,
    /// Bid on the sell venue, canonical quote.
    pub sell_price: Price,
    /// `(sell - buy) / buy`.
    pub spread_pct: Decimal,
    /// Base amount the plan trades.
    pub base_amount: Amount,
    /// Notional in canonical quote (`base_amount * buy_price`).
    pub notional_quote: Amount,
    pub est_gross: Amount,
    pub est_fees: Amount,
    pub est_slippage: Amount,
    pub est_net: Amount,
    pub created_ts: DateTime<Utc>,
    pub expires_ts: DateTime<Utc>,
}

impl Opportunity {
    /// Whether the opportunity is still actionable at `now`.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_ts
    }

    /// The venue pair, ordered buy then sell. Used as the executor's
    /// serialization key.
    #[must_use]
    pub fn pair(&self) -> (VenueId, VenueId) {
        (self.buy_venue.clone(), self.sell_venue.clone())
    }
}

/// Why an opportunity or candidate was rejected. Carried on events, not
/// errors: rejection is expected flow control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    SpreadBelowMinimum,
    VolumeBelowMinimum,
    ProfitBelowMinimum,
    Expired,
    InsufficientDepth,
    SlippageExceeded,
    PriceMoved,
    InsufficientBalance,
    ExposureExceeded,
    VenueUnhealthy,
    ExecutorBusy,
    NoExposureHeadroom,
    TooManyPositions,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SpreadBelowMinimum => "spread_below_minimum",
            Self::VolumeBelowMinimum => "volume_below_minimum",
            Self::ProfitBelowMinimum => "profit_below_minimum",
            Self::Expired => "expired",
            Self::InsufficientDepth => "insufficient_depth",
            Self::SlippageExceeded => "slippage_exceeded",
            Self::PriceMoved => "price_moved",
            Self::InsufficientBalance => "insufficient_balance",
            Self::ExposureExceeded => "exposure_exceeded",
            Self::VenueUnhealthy => "venue_unhealthy",
            Self::ExecutorBusy => "executor_busy",
            Self::NoExposureHeadroom => "no_exposure_headroom",
            Self::TooManyPositions => "too_many_positions",
        };
        write!(f, "{s}")
    }
}

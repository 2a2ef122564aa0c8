//! Positions left open by executions.
//!
//! A position is exposure that did not net out: base bought but not sold
//! (or the reverse). It carries a stop-loss and a ladder of take-profit
//! targets; targets are sticky — once `hit` is set it never clears, even
//! if price crosses back.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{PositionId, VenueId};
use super::money::{Amount, Price};
use super::order::Side;

/// Open or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// One rung of the take-profit ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeProfitTarget {
    /// Price at which this target triggers.
    pub price: Price,
    /// Fraction of the position to unwind at this target.
    pub fraction: Decimal,
    /// Sticky: set on first crossing, never cleared.
    pub hit: bool,
}

impl TakeProfitTarget {
    #[must_use]
    pub const fn new(price: Price, fraction: Decimal) -> Self {
        Self {
            price,
            fraction,
            hit: false,
        }
    }
}

/// An open or closed position on a single venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub venue: VenueId,
    /// The side of the order that created the exposure. A `Buy` position
    /// holds base; a `Sell` position is short base.
    pub side: Side,
    pub base_amount: Amount,
    pub entry_price: Price,
    pub stop_loss: Option<Price>,
    pub take_profit_targets: Vec<TakeProfitTarget>,
    pub status: PositionStatus,
    pub realized_pnl: Amount,
    pub unrealized_pnl: Amount,
    pub opened_ts: DateTime<Utc>,
    pub closed_ts: Option<DateTime<Utc>>,
}

impl Position {
    /// Entry notional in quote currency.
    #[must_use]
    pub fn entry_notional(&self) -> Amount {
        self.base_amount * self.entry_price
    }

    /// Recompute unrealized PnL at `current_price` and return the targets
    /// newly hit by this update (sticky transition false → true).
    pub fn mark(&mut self, current_price: Price) -> Vec<TakeProfitTarget> {
        self.unrealized_pnl = match self.side {
            Side::Buy => (current_price - self.entry_price) * self.base_amount,
            Side::Sell => (self.entry_price - current_price) * self.base_amount,
        };

        let mut newly_hit = Vec::new();
        for target in &mut self.take_profit_targets {
            if target.hit {
                continue;
            }
            let crossed = match self.side {
                Side::Buy => current_price >= target.price,
                Side::Sell => current_price <= target.price,
            };
            if crossed {
                target.hit = true;
                newly_hit.push(*target);
            }
        }
        newly_hit
    }

    /// Whether the stop-loss is breached at `current_price`.
    #[must_use]
    pub fn stop_loss_breached(&self, current_price: Price) -> bool {
        match (self.stop_loss, self.side) {
            (Some(stop), Side::Buy) => current_price <= stop,
            (Some(stop), Side::Sell) => current_price >= stop,
            (None, _) => false,
        }
    }

    /// Close the position at `exit_price`, realizing PnL.
    pub fn close(&mut self, exit_price: Price, now: DateTime<Utc>) {
        self.realized_pnl = match self.side {
            Side::Buy => (exit_price - self.entry_price) * self.base_amount,
            Side::Sell => (self.entry_price - exit_price) * self.base_amount,
        };
        self.unrealized_pnl = Decimal::ZERO;
        self.status = PositionStatus::Closed;
        self.closed_ts = Some(now);
    }
}

//! Orders and fills.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{ClientRef, OrderId, VenueId};
use super::money::{Amount, Price};

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Lifecycle state of an order. `Filled`, `Cancelled` and `Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    /// Accepted locally, not yet acknowledged by the venue.
    Pending,
    /// Live on the venue's book.
    Open,
    /// Some base filled, remainder still live.
    Partial,
    /// Fully filled.
    Filled,
    /// Cancelled with zero or partial fills.
    Cancelled,
    /// Rejected or errored at the venue.
    Failed,
}

impl OrderState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Failed)
    }
}

/// A single fill event against an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub base_amount: Amount,
    pub quote_amount: Amount,
    pub fee_quote: Amount,
    pub ts: DateTime<Utc>,
}

/// An order as tracked by the core: venue-assigned id plus the idempotent
/// client reference it was placed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub client_ref: ClientRef,
    pub venue: VenueId,
    pub side: Side,
    pub base_amount: Amount,
    pub limit_price: Price,
    pub state: OrderState,
    pub fills: Vec<Fill>,
    pub created_ts: DateTime<Utc>,
    pub updated_ts: DateTime<Utc>,
}

impl Order {
    /// Total base filled so far. Invariant: never exceeds `base_amount`.
    #[must_use]
    pub fn filled_base(&self) -> Amount {
        self.fills.iter().map(|f| f.base_amount).sum()
    }

    /// Total quote exchanged across fills.
    #[must_use]
    pub fn filled_quote(&self) -> Amount {
        self.fills.iter().map(|f| f.quote_amount).sum()
    }

    /// Total fees paid, in quote currency.
    #[must_use]
    pub fn fees_quote(&self) -> Amount {
        self.fills.iter().map(|f| f.fee_quote).sum()
    }

    /// Size-weighted average fill price, or the limit price if unfilled.
    #[must_use]
    pub fn avg_fill_price(&self) -> Price {
        let base = self.filled_base();
        if base.is_zero() {
            self.limit_price
        } else {
            self.filled_quote() / base
        }
    }

    /// Fraction of the requested base that has filled, in `[0, 1]`.
    #[must_use]
    pub fn fill_fraction(&self) -> Decimal {
        if self.base_amount.is_zero() {
            Decimal::ZERO
        } else {
            self.filled_base() / self.base_amount
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order_with_fills(base: Amount, fills: Vec<(Amount, Price)>) -> Order {
        let now = Utc::now();
        Order {
            id: OrderId::new("o-1"),
            client_ref: ClientRef::new("exec-1-buy"),
            venue: VenueId::new("north"),
            side: Side::Buy,
            base_amount: base,
            limit_price: dec!(5.00),
            state: OrderState::Partial,
            fills: fills
                .into_iter()
                .map(|(b, p)| Fill {
                    base_amount: b,
                    quote_amount: b * p,
                    fee_quote: dec!(0.01),
                    ts: now,
                })
                .collect(),
            created_ts: now,
            updated_ts: now,
        }
    }

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn terminal_states() {
        assert!(OrderState::Filled.is_terminal());
        assert!(OrderState::Cancelled.is_terminal());
        assert!(OrderState::Failed.is_terminal());
        assert!(!OrderState::Open.is_terminal());
        assert!(!OrderState::Partial.is_terminal());
        assert!(!OrderState::Pending.is_terminal());
    }

    #[test]
    fn fill_accounting() {
        let order = order_with_fills(dec!(100), vec![(dec!(40), dec!(5.00)), (dec!(20), dec!(5.02))]);
        assert_eq!(order.filled_base(), dec!(60));
        assert_eq!(order.filled_quote(), dec!(200.00) + dec!(100.40));
        assert_eq!(order.fees_quote(), dec!(0.02));
        assert_eq!(order.fill_fraction(), dec!(0.6));
    }

    #[test]
    fn avg_price_weights_by_size() {
        let order = order_with_fills(dec!(100), vec![(dec!(50), dec!(5.00)), (dec!(50), dec!(5.10))]);
        assert_eq!(order.avg_fill_price(), dec!(5.05));
    }

    #[test]
    fn unfilled_avg_price_falls_back_to_limit() {
        let order = order_with_fills(dec!(100), vec![]);
        assert_eq!(order.avg_fill_price(), dec!(5.00));
        assert_eq!(order.fill_fraction(), Decimal::ZERO);
    }
}

//! Order book depth snapshots and fill simulation.
//!
//! Depth is used transiently by the opportunity validator: fetched live,
//! walked once, discarded.

use rust_decimal::Decimal;

use super::money::{Amount, Price};

/// A single price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthLevel {
    price: Price,
    size: Amount,
}

impl DepthLevel {
    #[must_use]
    pub const fn new(price: Price, size: Amount) -> Self {
        Self { price, size }
    }

    #[must_use]
    pub const fn price(&self) -> Price {
        self.price
    }

    #[must_use]
    pub const fn size(&self) -> Amount {
        self.size
    }
}

/// Outcome of simulating a fill against one side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedFill {
    /// Base amount the book could absorb (≤ requested).
    pub filled_base: Amount,
    /// Quote spent or received across the walked levels.
    pub quote_total: Amount,
    /// Size-weighted average price of the walk.
    pub avg_price: Price,
}

impl SimulatedFill {
    /// Whether the requested amount was fully absorbed.
    #[must_use]
    pub fn absorbed(&self, requested: Amount) -> bool {
        self.filled_base >= requested
    }

    /// Relative slippage of the average fill versus the top of book.
    /// Positive means the walk moved against us.
    #[must_use]
    pub fn slippage_vs(&self, top: Price) -> Decimal {
        if top.is_zero() {
            return Decimal::ZERO;
        }
        ((self.avg_price - top) / top).abs()
    }
}

/// Order book depth for one venue: finite, price-monotone level lists.
///
/// Bids are sorted descending, asks ascending; constructors enforce the
/// ordering so a walk never has to re-sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBookDepth {
    bids: Vec<DepthLevel>,
    asks: Vec<DepthLevel>,
}

impl OrderBookDepth {
    /// Build a depth snapshot, sorting each side into canonical order.
    #[must_use]
    pub fn new(mut bids: Vec<DepthLevel>, mut asks: Vec<DepthLevel>) -> Self {
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self { bids, asks }
    }

    #[must_use]
    pub fn bids(&self) -> &[DepthLevel] {
        &self.bids
    }

    #[must_use]
    pub fn asks(&self) -> &[DepthLevel] {
        &self.asks
    }

    /// Best bid (highest buy price).
    #[must_use]
    pub fn best_bid(&self) -> Option<&DepthLevel> {
        self.bids.first()
    }

    /// Best ask (lowest sell price).
    #[must_use]
    pub fn best_ask(&self) -> Option<&DepthLevel> {
        self.asks.first()
    }

    /// Simulate buying `base_amount` by walking the ask side.
    #[must_use]
    pub fn simulate_buy(&self, base_amount: Amount) -> SimulatedFill {
        Self::walk(&self.asks, base_amount)
    }

    /// Simulate selling `base_amount` by walking the bid side.
    #[must_use]
    pub fn simulate_sell(&self, base_amount: Amount) -> SimulatedFill {
        Self::walk(&self.bids, base_amount)
    }

    fn walk(levels: &[DepthLevel], requested: Amount) -> SimulatedFill {
        let mut remaining = requested;
        let mut filled = Decimal::ZERO;
        let mut quote = Decimal::ZERO;

        for level in levels {
            if remaining <= Decimal::ZERO {
                break;
            }
            let take = remaining.min(level.size);
            filled += take;
            quote += take * level.price;
            remaining -= take;
        }

        let avg_price = if filled.is_zero() {
            Decimal::ZERO
        } else {
            quote / filled
        };

        SimulatedFill {
            filled_base: filled,
            quote_total: quote,
            avg_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn depth() -> OrderBookDepth {
        OrderBookDepth::new(
            vec![
                DepthLevel::new(dec!(5.04), dec!(60)),
                DepthLevel::new(dec!(5.05), dec!(40)),
            ],
            vec![
                DepthLevel::new(dec!(5.01), dec!(30)),
                DepthLevel::new(dec!(5.00), dec!(50)),
            ],
        )
    }

    #[test]
    fn sides_are_sorted_on_construction() {
        let d = depth();
        assert_eq!(d.best_bid().unwrap().price(), dec!(5.05));
        assert_eq!(d.best_ask().unwrap().price(), dec!(5.00));
    }

    #[test]
    fn buy_walk_crosses_levels() {
        let d = depth();
        let fill = d.simulate_buy(dec!(60));
        assert_eq!(fill.filled_base, dec!(60));
        // 50 @ 5.00 + 10 @ 5.01
        assert_eq!(fill.quote_total, dec!(300.10));
        assert!(fill.absorbed(dec!(60)));
        assert!(fill.avg_price > dec!(5.00));
    }

    #[test]
    fn walk_reports_partial_absorption() {
        let d = depth();
        let fill = d.simulate_buy(dec!(500));
        assert_eq!(fill.filled_base, dec!(80));
        assert!(!fill.absorbed(dec!(500)));
    }

    #[test]
    fn sell_walk_uses_bids() {
        let d = depth();
        let fill = d.simulate_sell(dec!(50));
        // 40 @ 5.05 + 10 @ 5.04
        assert_eq!(fill.quote_total, dec!(252.40));
        assert_eq!(fill.avg_price, dec!(252.40) / dec!(50));
    }

    #[test]
    fn slippage_against_top_of_book() {
        let d = depth();
        let fill = d.simulate_buy(dec!(80));
        let slip = fill.slippage_vs(dec!(5.00));
        assert!(slip > Decimal::ZERO);
        assert!(slip < dec!(0.01));
    }

    #[test]
    fn empty_book_fills_nothing() {
        let d = OrderBookDepth::new(vec![], vec![]);
        let fill = d.simulate_buy(dec!(10));
        assert_eq!(fill.filled_base, Decimal::ZERO);
        assert_eq!(fill.avg_price, Decimal::ZERO);
    }
}

//! Monetary types.
//!
//! All monetary quantities are `rust_decimal::Decimal`. Floating point is
//! reserved for durations, thresholds and other non-monetary ratios.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Price quoted in some currency.
pub type Price = Decimal;

/// Amount of base or quote currency.
pub type Amount = Decimal;

/// ISO-ish currency code (`"USDT"`, `"BTC"`, ...). Uppercased on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Currency {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// The canonical quote currency all prices are normalized to.
#[must_use]
pub fn canonical_quote() -> Currency {
    Currency::new("USDT")
}

/// Maker/taker fee rates for a venue, as fractions (0.001 = 0.1%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub maker: Decimal,
    pub taker: Decimal,
}

impl FeeSchedule {
    #[must_use]
    pub const fn new(maker: Decimal, taker: Decimal) -> Self {
        Self { maker, taker }
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        // 0.1% both sides, a common spot-venue default.
        Self {
            maker: Decimal::new(1, 3),
            taker: Decimal::new(1, 3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn currency_uppercases() {
        assert_eq!(Currency::new("usdt").as_str(), "USDT");
        assert_eq!(Currency::from("btc"), Currency::from("BTC"));
    }

    #[test]
    fn canonical_quote_is_usdt() {
        assert_eq!(canonical_quote().as_str(), "USDT");
    }

    #[test]
    fn fee_schedule_default() {
        let fees = FeeSchedule::default();
        assert_eq!(fees.taker, dec!(0.001));
        assert_eq!(fees.maker, dec!(0.001));
    }
}

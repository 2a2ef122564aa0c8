//! Risk limits and daily counters.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One rung of the configured take-profit ladder, as an offset from entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    /// Offset from entry price as a fraction (0.02 = +2%).
    pub percent: Decimal,
    /// Fraction of the position to unwind when the rung triggers.
    pub fraction: Decimal,
}

/// Risk limits backing every ledger decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskLimits {
    /// Maximum notional of a single position, canonical quote.
    pub max_position_size: Decimal,
    /// Cap on total live exposure (open positions + quote holds).
    pub max_total_exposure: Decimal,
    /// Cap on traded volume per UTC day.
    pub max_daily_exposure: Decimal,
    /// Cap on realized loss per UTC day (positive number).
    pub max_daily_loss: Decimal,
    /// Cap on peak-to-trough drawdown (positive number).
    pub max_drawdown: Decimal,
    /// Minimum acceptable venue liquidity for a trade.
    pub min_liquidity: Decimal,
    /// Reservation TTL.
    pub reserve_timeout_ms: u64,
    /// Cap on simultaneously open positions per venue.
    pub max_positions_per_venue: usize,
    /// Stop-loss offset from entry, as a fraction (0.05 = −5%).
    pub stop_loss_percent: Decimal,
    /// Take-profit ladder applied to positions the executor leaves open.
    pub take_profit_targets: Vec<TakeProfitLevel>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::from(1000),
            max_total_exposure: Decimal::from(10_000),
            max_daily_exposure: Decimal::from(50_000),
            max_daily_loss: Decimal::from(500),
            max_drawdown: Decimal::from(1000),
            min_liquidity: Decimal::from(1000),
            reserve_timeout_ms: 30_000,
            max_positions_per_venue: 5,
            stop_loss_percent: Decimal::new(5, 2),
            take_profit_targets: vec![
                TakeProfitLevel {
                    percent: Decimal::new(2, 2),
                    fraction: Decimal::new(5, 1),
                },
                TakeProfitLevel {
                    percent: Decimal::new(5, 2),
                    fraction: Decimal::new(5, 1),
                },
            ],
        }
    }
}

/// Per-UTC-day trading counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub day_start_ts: DateTime<Utc>,
    pub trades: u64,
    pub volume_quote: Decimal,
    pub realized_pnl: Decimal,
    pub max_drawdown: Decimal,
    /// Running equity peak used to derive drawdown.
    peak_pnl: Decimal,
}

impl DailyStats {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            day_start_ts: day_start(now),
            trades: 0,
            volume_quote: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            peak_pnl: Decimal::ZERO,
        }
    }

    /// Reset counters if `now` has crossed into a new UTC day.
    pub fn roll_if_new_day(&mut self, now: DateTime<Utc>) {
        if day_start(now) > self.day_start_ts {
            *self = Self::new(now);
        }
    }

    /// Record a completed trade.
    pub fn record_trade(&mut self, volume_quote: Decimal, pnl: Decimal) {
        self.trades += 1;
        self.volume_quote += volume_quote;
        self.realized_pnl += pnl;
        self.peak_pnl = self.peak_pnl.max(self.realized_pnl);
        let drawdown = self.peak_pnl - self.realized_pnl;
        self.max_drawdown = self.max_drawdown.max(drawdown);
    }

    /// Realized loss so far today, as a non-negative number.
    #[must_use]
    pub fn realized_loss(&self) -> Decimal {
        (-self.realized_pnl).max(Decimal::ZERO)
    }
}

fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map_or(now, |naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn record_trade_accumulates() {
        let mut stats = DailyStats::new(Utc::now());
        stats.record_trade(dec!(500), dec!(4.80));
        stats.record_trade(dec!(300), dec!(-1.20));
        assert_eq!(stats.trades, 2);
        assert_eq!(stats.volume_quote, dec!(800));
        assert_eq!(stats.realized_pnl, dec!(3.60));
    }

    #[test]
    fn drawdown_tracks_peak_to_trough() {
        let mut stats = DailyStats::new(Utc::now());
        stats.record_trade(dec!(100), dec!(10));
        stats.record_trade(dec!(100), dec!(-4));
        stats.record_trade(dec!(100), dec!(-3));
        // Peak 10, trough 3 -> drawdown 7.
        assert_eq!(stats.max_drawdown, dec!(7));
        stats.record_trade(dec!(100), dec!(20));
        assert_eq!(stats.max_drawdown, dec!(7));
    }

    #[test]
    fn realized_loss_clamps_at_zero() {
        let mut stats = DailyStats::new(Utc::now());
        stats.record_trade(dec!(100), dec!(5));
        assert_eq!(stats.realized_loss(), Decimal::ZERO);
        stats.record_trade(dec!(100), dec!(-12));
        assert_eq!(stats.realized_loss(), dec!(7));
    }

    #[test]
    fn rolls_into_a_new_day() {
        let now = Utc::now();
        let mut stats = DailyStats::new(now);
        stats.record_trade(dec!(100), dec!(5));

        stats.roll_if_new_day(now);
        assert_eq!(stats.trades, 1);

        stats.roll_if_new_day(now + Duration::days(1));
        assert_eq!(stats.trades, 0);
        assert_eq!(stats.realized_pnl, Decimal::ZERO);
    }
}

//! Risk and position ledger.
//!
//! Authoritative in-memory state for balances, reservations, positions and
//! daily counters. Every mutation passes through one mutex over the whole
//! book, so `available = max(0, total - Σ live reservations)` is always a
//! consistent snapshot and reserve is an atomic check-and-insert.

mod limits;
mod reservation;

pub use limits::{DailyStats, RiskLimits, TakeProfitLevel};
pub use reservation::Reservation;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::domain::{
    Currency, Position, PositionId, PositionStatus, ReservationId, Side, TakeProfitTarget,
    VenueId,
};
use crate::error::LedgerError;
use crate::service::{Event, EventBus, LimitKind};

/// A consistent `(total, available)` view of one balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub total: Decimal,
    pub available: Decimal,
}

#[derive(Debug, Default)]
struct Book {
    /// Authoritative totals per (venue, currency).
    totals: HashMap<(VenueId, Currency), Decimal>,
    reservations: HashMap<ReservationId, Reservation>,
    positions: HashMap<PositionId, Position>,
    next_position_id: u64,
    daily: Option<DailyStats>,
}

impl Book {
    fn reserved_for(&self, venue: &VenueId, currency: &Currency) -> Decimal {
        self.reservations
            .values()
            .filter(|r| &r.venue == venue && &r.currency == currency)
            .map(|r| r.amount)
            .sum()
    }

    fn snapshot(&self, venue: &VenueId, currency: &Currency) -> BalanceSnapshot {
        let total = self
            .totals
            .get(&(venue.clone(), currency.clone()))
            .copied()
            .unwrap_or(Decimal::ZERO);
        let available = (total - self.reserved_for(venue, currency)).max(Decimal::ZERO);
        BalanceSnapshot { total, available }
    }

    fn open_positions_on(&self, venue: &VenueId) -> usize {
        self.positions
            .values()
            .filter(|p| p.status == PositionStatus::Open && &p.venue == venue)
            .count()
    }

    fn exposure(&self) -> Decimal {
        let positions: Decimal = self
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .map(Position::entry_notional)
            .sum();
        let holds: Decimal = self.reservations.values().map(|r| r.amount).sum();
        positions + holds
    }
}

/// The ledger facade. Cheap to clone via `Arc`.
pub struct Ledger {
    pair: (Currency, Currency),
    limits: RiskLimits,
    book: Mutex<Book>,
    events: EventBus,
}

impl Ledger {
    /// Create a ledger for a `(base, quote)` trading pair.
    #[must_use]
    pub fn new(base: Currency, quote: Currency, limits: RiskLimits, events: EventBus) -> Self {
        Self {
            pair: (base, quote),
            limits,
            book: Mutex::new(Book::default()),
            events,
        }
    }

    #[must_use]
    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    #[must_use]
    pub fn base_currency(&self) -> &Currency {
        &self.pair.0
    }

    #[must_use]
    pub fn quote_currency(&self) -> &Currency {
        &self.pair.1
    }

    /// Set the authoritative total for a balance. Amount must be ≥ 0.
    pub fn update_balance(
        &self,
        venue: &VenueId,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<BalanceSnapshot, LedgerError> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount {
                context: "update_balance",
                amount,
            });
        }

        let snapshot = {
            let mut book = self.book.lock();
            book.totals
                .insert((venue.clone(), currency.clone()), amount);
            book.snapshot(venue, currency)
        };

        self.events.emit(Event::BalanceUpdated {
            venue: venue.clone(),
            currency: currency.as_str().to_string(),
            total: snapshot.total,
            available: snapshot.available,
        });
        Ok(snapshot)
    }

    /// Consistent `(total, available)` view of one balance.
    #[must_use]
    pub fn balance(&self, venue: &VenueId, currency: &Currency) -> BalanceSnapshot {
        self.book.lock().snapshot(venue, currency)
    }

    /// Shorthand for the available side of [`Self::balance`].
    #[must_use]
    pub fn available(&self, venue: &VenueId, currency: &Currency) -> Decimal {
        self.balance(venue, currency).available
    }

    /// Atomically check availability and insert a hold.
    pub fn reserve(
        &self,
        venue: &VenueId,
        currency: &Currency,
        amount: Decimal,
        order_ref: &str,
        ttl: Duration,
    ) -> Result<Reservation, LedgerError> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount {
                context: "reserve",
                amount,
            });
        }

        let mut book = self.book.lock();
        let snapshot = book.snapshot(venue, currency);
        if snapshot.available < amount {
            return Err(LedgerError::InsufficientAvailable {
                venue: venue.clone(),
                currency: currency.as_str().to_string(),
                requested: amount,
                available: snapshot.available,
            });
        }

        let now = Utc::now();
        let reservation = Reservation {
            id: ReservationId::new(),
            venue: venue.clone(),
            currency: currency.clone(),
            amount,
            order_ref: order_ref.to_string(),
            created_ts: now,
            expires_ts: now
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(30)),
        };
        book.reservations
            .insert(reservation.id.clone(), reservation.clone());
        debug!(
            reservation = %reservation.id,
            venue = %venue,
            currency = %currency,
            amount = %amount,
            "balance reserved"
        );
        Ok(reservation)
    }

    /// Drop a hold without any balance change.
    pub fn release(&self, id: &ReservationId) -> Result<(), LedgerError> {
        let removed = self.book.lock().reservations.remove(id);
        match removed {
            Some(res) => {
                debug!(reservation = %res.id, "reservation released");
                Ok(())
            }
            None => Err(LedgerError::UnknownReservation(id.as_str().to_string())),
        }
    }

    /// Convert a hold into a realized balance delta, atomically.
    ///
    /// Direction follows the reserved currency: a quote-currency hold backs
    /// a buy (debit quote `actual_quote + fee`, credit base `actual_base`);
    /// a base-currency hold backs a sell (debit base `actual_base`, credit
    /// quote `actual_quote - fee`).
    pub fn consume(
        &self,
        id: &ReservationId,
        actual_quote: Decimal,
        actual_base: Decimal,
        fee_quote: Decimal,
    ) -> Result<(), LedgerError> {
        let (base_ccy, quote_ccy) = (self.pair.0.clone(), self.pair.1.clone());

        let updates = {
            let mut book = self.book.lock();
            let reservation = book
                .reservations
                .remove(id)
                .ok_or_else(|| LedgerError::UnknownReservation(id.as_str().to_string()))?;

            let venue = reservation.venue.clone();
            let (debit_ccy, debit, credit_ccy, credit) = if reservation.currency == quote_ccy {
                (quote_ccy, actual_quote + fee_quote, base_ccy, actual_base)
            } else {
                (base_ccy, actual_base, quote_ccy, actual_quote - fee_quote)
            };

            for (ccy, delta) in [(debit_ccy.clone(), -debit), (credit_ccy.clone(), credit)] {
                let entry = book
                    .totals
                    .entry((venue.clone(), ccy))
                    .or_insert(Decimal::ZERO);
                *entry = (*entry + delta).max(Decimal::ZERO);
            }

            let debit_snap = book.snapshot(&venue, &debit_ccy);
            let credit_snap = book.snapshot(&venue, &credit_ccy);
            vec![
                (venue.clone(), debit_ccy, debit_snap),
                (venue, credit_ccy, credit_snap),
            ]
        };

        for (venue, currency, snapshot) in updates {
            self.events.emit(Event::BalanceUpdated {
                venue,
                currency: currency.as_str().to_string(),
                total: snapshot.total,
                available: snapshot.available,
            });
        }
        Ok(())
    }

    /// Remove and report all reservations expired at `now`.
    ///
    /// Expiry releases the hold as if it was never consumed; cancelling any
    /// live venue order is the executor's responsibility.
    pub fn expire_due(&self, now: DateTime<Utc>) -> Vec<Reservation> {
        let expired: Vec<Reservation> = {
            let mut book = self.book.lock();
            let ids: Vec<ReservationId> = book
                .reservations
                .values()
                .filter(|r| r.is_expired(now))
                .map(|r| r.id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| book.reservations.remove(&id))
                .collect()
        };

        for res in &expired {
            warn!(
                reservation = %res.id,
                venue = %res.venue,
                order_ref = %res.order_ref,
                "reservation expired"
            );
            self.events.emit(Event::ReserveTimeout {
                reservation_id: res.id.clone(),
                venue: res.venue.clone(),
                currency: res.currency.as_str().to_string(),
                amount: res.amount,
                expired_at: res.expires_ts,
            });
        }
        expired
    }

    /// Whether a reservation is still live.
    #[must_use]
    pub fn reservation_live(&self, id: &ReservationId) -> bool {
        self.book.lock().reservations.contains_key(id)
    }

    /// Total live exposure: open position notionals plus live holds.
    #[must_use]
    pub fn total_exposure(&self) -> Decimal {
        self.book.lock().exposure()
    }

    /// Open a position with the configured stop-loss and take-profit ladder
    /// derived from `entry_price`.
    pub fn open_position(
        &self,
        venue: &VenueId,
        side: Side,
        base_amount: Decimal,
        entry_price: Decimal,
    ) -> Position {
        let now = Utc::now();
        let stop_loss = if self.limits.stop_loss_percent > Decimal::ZERO {
            let offset = entry_price * self.limits.stop_loss_percent;
            Some(match side {
                Side::Buy => entry_price - offset,
                Side::Sell => entry_price + offset,
            })
        } else {
            None
        };
        let targets = self
            .limits
            .take_profit_targets
            .iter()
            .map(|level| {
                let offset = entry_price * level.percent;
                let price = match side {
                    Side::Buy => entry_price + offset,
                    Side::Sell => entry_price - offset,
                };
                TakeProfitTarget::new(price, level.fraction)
            })
            .collect();

        let position = {
            let mut book = self.book.lock();
            book.next_position_id += 1;
            let position = Position {
                id: PositionId::new(book.next_position_id),
                venue: venue.clone(),
                side,
                base_amount,
                entry_price,
                stop_loss,
                take_profit_targets: targets,
                status: PositionStatus::Open,
                realized_pnl: Decimal::ZERO,
                unrealized_pnl: Decimal::ZERO,
                opened_ts: now,
                closed_ts: None,
            };
            book.positions.insert(position.id, position.clone());
            position
        };

        info!(
            position = %position.id,
            venue = %venue,
            side = %side,
            base = %base_amount,
            entry = %entry_price,
            "position opened"
        );
        self.events.emit(Event::PositionOpened {
            position_id: position.id,
            venue: venue.clone(),
        });
        position
    }

    /// Mark a position at `current_price`, evaluating stop-loss and the
    /// sticky take-profit ladder.
    pub fn update_position(
        &self,
        id: PositionId,
        current_price: Decimal,
    ) -> Result<Position, LedgerError> {
        let (position, newly_hit, stop_breached) = {
            let mut book = self.book.lock();
            let position = book
                .positions
                .get_mut(&id)
                .ok_or_else(|| LedgerError::UnknownPosition(id.to_string()))?;
            let newly_hit = position.mark(current_price);
            let stop = position.stop_loss_breached(current_price);
            (position.clone(), newly_hit, stop)
        };

        self.events.emit(Event::PositionUpdated {
            position_id: id,
            unrealized_pnl: position.unrealized_pnl,
        });
        for target in newly_hit {
            info!(
                position = %id,
                target = %target.price,
                fraction = %target.fraction,
                "take-profit target hit"
            );
        }
        if stop_breached {
            self.events.emit(Event::LimitBreached {
                kind: LimitKind::Loss,
                value: -position.unrealized_pnl,
                limit: self.limits.max_daily_loss,
                context: format!("stop-loss breached on {}", position.id),
            });
        }
        Ok(position)
    }

    /// Close a position at `exit_price`, realizing PnL into daily stats.
    pub fn close_position(
        &self,
        id: PositionId,
        exit_price: Decimal,
    ) -> Result<Position, LedgerError> {
        let now = Utc::now();
        let position = {
            let mut book = self.book.lock();
            let position = book
                .positions
                .get_mut(&id)
                .ok_or_else(|| LedgerError::UnknownPosition(id.to_string()))?;
            position.close(exit_price, now);
            let snapshot = position.clone();
            let volume = snapshot.entry_notional();
            let pnl = snapshot.realized_pnl;
            let daily = book.daily.get_or_insert_with(|| DailyStats::new(now));
            daily.roll_if_new_day(now);
            daily.record_trade(volume, pnl);
            snapshot
        };

        self.events.emit(Event::PositionClosed {
            position_id: id,
            realized_pnl: position.realized_pnl,
        });
        Ok(position)
    }

    /// Fetch a position snapshot.
    #[must_use]
    pub fn position(&self, id: PositionId) -> Option<Position> {
        self.book.lock().positions.get(&id).cloned()
    }

    /// All open positions.
    #[must_use]
    pub fn open_positions(&self) -> Vec<Position> {
        self.book
            .lock()
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .cloned()
            .collect()
    }

    /// Record a completed round-trip trade that left no position behind.
    pub fn record_trade(&self, volume_quote: Decimal, pnl: Decimal) {
        let now = Utc::now();
        let mut book = self.book.lock();
        let daily = book.daily.get_or_insert_with(|| DailyStats::new(now));
        daily.roll_if_new_day(now);
        daily.record_trade(volume_quote, pnl);
    }

    /// Snapshot of today's counters.
    #[must_use]
    pub fn daily_stats(&self) -> DailyStats {
        let now = Utc::now();
        let mut book = self.book.lock();
        let daily = book.daily.get_or_insert_with(|| DailyStats::new(now));
        daily.roll_if_new_day(now);
        daily.clone()
    }

    /// Check `value` against the limit of `kind`, emitting `limit_breached`
    /// when it fails.
    ///
    /// Semantics per kind: `Position` — proposed notional must not exceed
    /// `max_position_size`; `Exposure` — current exposure plus `value` must
    /// stay within `max_total_exposure`; `Loss` / `Drawdown` — today's
    /// realized loss / drawdown plus `value` must stay within the daily
    /// caps; `Slippage` — `value` is a fraction compared against the given
    /// context limit upstream (the ledger only reports it); `Liquidity` —
    /// `value` must be at least `min_liquidity`.
    pub fn check_limit(&self, kind: LimitKind, value: Decimal, context: &str) -> bool {
        let (ok, limit) = match kind {
            LimitKind::Position => (value <= self.limits.max_position_size, self.limits.max_position_size),
            LimitKind::Exposure => {
                let exposure = self.total_exposure();
                (
                    exposure + value <= self.limits.max_total_exposure,
                    self.limits.max_total_exposure,
                )
            }
            LimitKind::Loss => {
                let loss = self.daily_stats().realized_loss();
                (loss + value <= self.limits.max_daily_loss, self.limits.max_daily_loss)
            }
            LimitKind::Drawdown => {
                let drawdown = self.daily_stats().max_drawdown;
                (
                    drawdown + value <= self.limits.max_drawdown,
                    self.limits.max_drawdown,
                )
            }
            LimitKind::Slippage => (true, Decimal::ZERO),
            LimitKind::Liquidity => (value >= self.limits.min_liquidity, self.limits.min_liquidity),
        };

        if !ok {
            self.events.emit(Event::LimitBreached {
                kind,
                value,
                limit,
                context: context.to_string(),
            });
        }
        ok
    }

    /// Count of open positions on one venue, for `max_positions_per_venue`.
    #[must_use]
    pub fn open_positions_on(&self, venue: &VenueId) -> usize {
        self.book.lock().open_positions_on(venue)
    }
}

/// Background sweeper expiring reservations at `reserve_timeout_ms / 4`
/// cadence.
pub fn spawn_expiry_sweeper(ledger: Arc<Ledger>) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_millis((ledger.limits.reserve_timeout_ms / 4).max(250));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            ledger.expire_due(Utc::now());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ledger() -> Ledger {
        Ledger::new(
            Currency::new("TON"),
            Currency::new("USDT"),
            RiskLimits::default(),
            EventBus::new(64),
        )
    }

    fn north() -> VenueId {
        VenueId::new("north")
    }

    fn usdt() -> Currency {
        Currency::new("USDT")
    }

    fn ton() -> Currency {
        Currency::new("TON")
    }

    #[test]
    fn update_balance_rejects_negative() {
        let ledger = ledger();
        let err = ledger
            .update_balance(&north(), &usdt(), dec!(-1))
            .unwrap_err();
        assert!(matches!(err, LedgerError::NegativeAmount { .. }));
    }

    #[test]
    fn available_subtracts_live_reservations() {
        let ledger = ledger();
        ledger.update_balance(&north(), &usdt(), dec!(1000)).unwrap();

        let res = ledger
            .reserve(&north(), &usdt(), dec!(600), "exec-1-buy", Duration::from_secs(30))
            .unwrap();

        let snap = ledger.balance(&north(), &usdt());
        assert_eq!(snap.total, dec!(1000));
        assert_eq!(snap.available, dec!(400));

        // Second reserve beyond available fails atomically.
        let err = ledger
            .reserve(&north(), &usdt(), dec!(500), "exec-2-buy", Duration::from_secs(30))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientAvailable { .. }));

        ledger.release(&res.id).unwrap();
        assert_eq!(ledger.available(&north(), &usdt()), dec!(1000));
    }

    #[test]
    fn reserve_then_release_restores_available() {
        let ledger = ledger();
        ledger.update_balance(&north(), &usdt(), dec!(1000)).unwrap();
        let before = ledger.available(&north(), &usdt());

        let res = ledger
            .reserve(&north(), &usdt(), dec!(250), "exec-1-buy", Duration::from_secs(30))
            .unwrap();
        ledger.release(&res.id).unwrap();

        assert_eq!(ledger.available(&north(), &usdt()), before);
    }

    #[test]
    fn consume_buy_moves_quote_to_base() {
        let ledger = ledger();
        ledger.update_balance(&north(), &usdt(), dec!(1000)).unwrap();
        ledger.update_balance(&north(), &ton(), dec!(0)).unwrap();

        let res = ledger
            .reserve(&north(), &usdt(), dec!(505), "exec-1-buy", Duration::from_secs(30))
            .unwrap();

        // Bought 100 base for 500 quote, 1 quote fee.
        ledger.consume(&res.id, dec!(500), dec!(100), dec!(1)).unwrap();

        assert_eq!(ledger.balance(&north(), &usdt()).total, dec!(499));
        assert_eq!(ledger.balance(&north(), &ton()).total, dec!(100));
        assert!(!ledger.reservation_live(&res.id));
        // The hold is gone: available equals total again.
        assert_eq!(ledger.available(&north(), &usdt()), dec!(499));
    }

    #[test]
    fn consume_sell_moves_base_to_quote() {
        let ledger = ledger();
        ledger.update_balance(&north(), &ton(), dec!(200)).unwrap();
        ledger.update_balance(&north(), &usdt(), dec!(0)).unwrap();

        let res = ledger
            .reserve(&north(), &ton(), dec!(100), "exec-1-sell", Duration::from_secs(30))
            .unwrap();
        ledger.consume(&res.id, dec!(505), dec!(100), dec!(1)).unwrap();

        assert_eq!(ledger.balance(&north(), &ton()).total, dec!(100));
        assert_eq!(ledger.balance(&north(), &usdt()).total, dec!(504));
    }

    #[test]
    fn consume_unknown_reservation_fails() {
        let ledger = ledger();
        let err = ledger
            .consume(&ReservationId::new(), dec!(1), dec!(1), dec!(0))
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownReservation(_)));
    }

    #[test]
    fn expiry_releases_and_reports() {
        let ledger = ledger();
        ledger.update_balance(&north(), &usdt(), dec!(1000)).unwrap();
        let res = ledger
            .reserve(&north(), &usdt(), dec!(400), "exec-1-buy", Duration::from_secs(30))
            .unwrap();

        let expired = ledger.expire_due(Utc::now() + chrono::Duration::seconds(31));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, res.id);
        assert_eq!(ledger.available(&north(), &usdt()), dec!(1000));
    }

    #[test]
    fn expiry_skips_live_reservations() {
        let ledger = ledger();
        ledger.update_balance(&north(), &usdt(), dec!(1000)).unwrap();
        ledger
            .reserve(&north(), &usdt(), dec!(400), "exec-1-buy", Duration::from_secs(30))
            .unwrap();

        let expired = ledger.expire_due(Utc::now() + chrono::Duration::seconds(10));
        assert!(expired.is_empty());
        assert_eq!(ledger.available(&north(), &usdt()), dec!(600));
    }

    #[test]
    fn exposure_counts_positions_and_holds() {
        let ledger = ledger();
        ledger.update_balance(&north(), &usdt(), dec!(5000)).unwrap();
        ledger
            .reserve(&north(), &usdt(), dec!(500), "exec-1-buy", Duration::from_secs(30))
            .unwrap();
        ledger.open_position(&north(), Side::Buy, dec!(40), dec!(5.00));

        assert_eq!(ledger.total_exposure(), dec!(700));
    }

    #[test]
    fn open_position_applies_stop_and_targets() {
        let ledger = ledger();
        let pos = ledger.open_position(&north(), Side::Buy, dec!(40), dec!(5.00));
        // 5% stop below entry.
        assert_eq!(pos.stop_loss, Some(dec!(4.7500)));
        assert_eq!(pos.take_profit_targets.len(), 2);
        assert_eq!(pos.take_profit_targets[0].price, dec!(5.1000));
        assert!(!pos.take_profit_targets[0].hit);
    }

    #[test]
    fn close_position_realizes_into_daily_stats() {
        let ledger = ledger();
        let pos = ledger.open_position(&north(), Side::Buy, dec!(40), dec!(5.00));
        let closed = ledger.close_position(pos.id, dec!(5.10)).unwrap();
        assert_eq!(closed.realized_pnl, dec!(4.00));

        let stats = ledger.daily_stats();
        assert_eq!(stats.trades, 1);
        assert_eq!(stats.realized_pnl, dec!(4.00));
        assert!(ledger.open_positions().is_empty());
    }

    #[test]
    fn check_limit_position_and_exposure() {
        let ledger = ledger();
        assert!(ledger.check_limit(LimitKind::Position, dec!(1000), "t"));
        assert!(!ledger.check_limit(LimitKind::Position, dec!(1001), "t"));

        assert!(ledger.check_limit(LimitKind::Exposure, dec!(10000), "t"));
        ledger.open_position(&north(), Side::Buy, dec!(100), dec!(5.00));
        assert!(!ledger.check_limit(LimitKind::Exposure, dec!(9600), "t"));
    }

    #[test]
    fn check_limit_liquidity_is_a_floor() {
        let ledger = ledger();
        assert!(ledger.check_limit(LimitKind::Liquidity, dec!(1000), "t"));
        assert!(!ledger.check_limit(LimitKind::Liquidity, dec!(999), "t"));
    }

    #[test]
    fn positions_per_venue_counter() {
        let ledger = ledger();
        assert_eq!(ledger.open_positions_on(&north()), 0);
        ledger.open_position(&north(), Side::Buy, dec!(10), dec!(5.00));
        ledger.open_position(&north(), Side::Buy, dec!(10), dec!(5.00));
        let pos = ledger.open_position(&VenueId::new("east"), Side::Buy, dec!(10), dec!(5.00));
        assert_eq!(ledger.open_positions_on(&north()), 2);
        ledger.close_position(pos.id, dec!(5.00)).unwrap();
        assert_eq!(ledger.open_positions_on(&VenueId::new("east")), 0);
    }
}

//! The staged execution state machine.
//!
//! `Reserving -> BuyPlaced -> BuyFilled -> SellPlaced -> SellFilled ->
//! Settled`, with every error path funneling through recovery. The
//! invariants the code below maintains:
//!
//! - no placement is ever issued twice for one client ref; unknown
//!   outcomes are resolved by idempotent lookup or escalated,
//! - a filled buy that cannot be matched by a sell always produces
//!   exactly one open position,
//! - ledger state is only mutated after positively confirmed outcomes.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{
    ClientRef, ExecutionId, Order, OrderState, PositionId, ReservationId, Side, VenueId,
};
use crate::ledger::Ledger;
use crate::service::{Event, EventBus};
use crate::validator::ValidatedPlan;
use crate::venue::{CancelOutcome, VenueAdapter};

/// Execution engine tunables. Durations under test shrink to milliseconds.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Fraction of the requested base that must fill for a leg to count
    /// (0.95). A partial at exactly this fraction is accepted.
    pub min_fill_fraction: Decimal,
    /// Deadline for each fill-wait and for the initial orphan lookup.
    pub order_timeout: Duration,
    /// Cadence of fill polling and orphan lookups.
    pub poll_interval: Duration,
    /// Global bound on the whole execution.
    pub settlement_timeout: Duration,
    /// Fraction of the settlement budget after which a warning fires.
    pub warning_threshold: f64,
    /// Consecutive stable balance reads that confirm settlement.
    pub confirmations: u32,
    /// Gap between confirmation reads.
    pub confirmation_interval: Duration,
    /// Sell placements attempted after the buy leg has filled.
    pub retry_attempts: u32,
    /// Delay between those attempts.
    pub retry_delay: Duration,
    /// Hard deadline for resolving an orphaned placement.
    pub orphan_resolve_deadline: Duration,
    /// Safety margin applied to the quote reservation for fees.
    pub fee_buffer: Decimal,
    /// TTL for both reservations.
    pub reserve_ttl: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            min_fill_fraction: Decimal::new(95, 2),
            order_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            settlement_timeout: Duration::from_secs(300),
            warning_threshold: 0.8,
            confirmations: 3,
            confirmation_interval: Duration::from_secs(1),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(10),
            orphan_resolve_deadline: Duration::from_secs(180),
            fee_buffer: Decimal::new(1, 2),
            reserve_ttl: Duration::from_secs(30),
        }
    }
}

/// What an execution produced.
#[derive(Debug, Clone)]
pub struct SettlementReport {
    pub execution_id: ExecutionId,
    /// Measured profit in canonical quote over the matched base.
    pub profit_quote: Decimal,
    pub buy_filled_base: Decimal,
    pub sell_filled_base: Decimal,
    /// Position opened for unmatched base, if any.
    pub position: Option<PositionId>,
}

/// Terminal state of one execution.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Both legs filled and settled with matching amounts.
    Settled(SettlementReport),
    /// Settled, but part of the bought base could not be sold and was
    /// carried as a position.
    CompensatedSettled(SettlementReport),
    /// The execution failed; any exposure is recorded as a position.
    Failed { stage: &'static str, reason: String },
    /// Dropped because the venue pair already hosts an execution.
    Busy,
}

enum PlaceFailure {
    /// Outcome unknown after the orphan deadline; escalated, never
    /// re-placed.
    Unresolved,
    Error(crate::error::VenueError),
}

struct WaitOutcome {
    order: Order,
    /// A backing reservation expired while waiting.
    reserve_expired: bool,
}

/// One execution in flight. Owns nothing shared; everything mutable lives
/// on the ledger or the venue.
pub(super) struct ExecutionRun<'a> {
    config: &'a ExecutionConfig,
    ledger: Arc<Ledger>,
    events: EventBus,
    buy_adapter: Arc<dyn VenueAdapter>,
    sell_adapter: Arc<dyn VenueAdapter>,
    plan: ValidatedPlan,
    execution_id: ExecutionId,
    started: Instant,
    warned: bool,
    quote_hold: Option<ReservationId>,
    base_hold: Option<ReservationId>,
}

impl<'a> ExecutionRun<'a> {
    pub(super) fn new(
        config: &'a ExecutionConfig,
        ledger: Arc<Ledger>,
        events: EventBus,
        buy_adapter: Arc<dyn VenueAdapter>,
        sell_adapter: Arc<dyn VenueAdapter>,
        plan: ValidatedPlan,
    ) -> Self {
        Self {
            config,
            ledger,
            events,
            buy_adapter,
            sell_adapter,
            plan,
            execution_id: ExecutionId::new(),
            started: Instant::now(),
            warned: false,
            quote_hold: None,
            base_hold: None,
        }
    }

    pub(super) async fn drive(mut self) -> ExecutionOutcome {
        let opp = &self.plan.opportunity;
        self.events.emit(Event::ExecutionStarted {
            execution_id: self.execution_id.to_string(),
            opportunity_id: opp.id.to_string(),
            buy_venue: opp.buy_venue.clone(),
            sell_venue: opp.sell_venue.clone(),
        });

        // Phase 1: Reserving.
        self.stage_started("reserving");
        if let Err(outcome) = self.reserve() {
            return outcome;
        }
        self.stage_completed("reserving");

        // Phase 2: BuyPlaced.
        self.stage_started("buy_place");
        let buy_order = match self.place_buy().await {
            Ok(order) => order,
            Err(outcome) => return outcome,
        };
        self.stage_completed("buy_place");

        // Phase 3: BuyFilled.
        self.stage_started("buy_fill");
        let buy_final = match self.fill_buy(buy_order).await {
            Ok(order) => order,
            Err(outcome) => return outcome,
        };
        self.stage_completed("buy_fill");
        self.check_warning();

        let buy_filled = buy_final.filled_base();

        // Phase 4: SellPlaced.
        self.stage_started("sell_place");
        let sell_order = match self.place_sell(&buy_final, buy_filled).await {
            Ok(order) => order,
            Err(outcome) => return outcome,
        };
        self.stage_completed("sell_place");

        // Phase 5: SellFilled.
        self.stage_started("sell_fill");
        let sell_final = match self.fill_sell(&buy_final, sell_order).await {
            Ok(order) => order,
            Err(outcome) => return outcome,
        };
        self.stage_completed("sell_fill");
        self.check_warning();

        // Phase 6: Settled.
        self.stage_started("settle");
        let outcome = self.settle(&buy_final, &sell_final).await;
        self.stage_completed("settle");
        outcome
    }

    // ---- Phase 1 ------------------------------------------------------

    fn reserve(&mut self) -> Result<(), ExecutionOutcome> {
        let opp = &self.plan.opportunity;
        let quote_amount =
            self.plan.base_amount * opp.buy_price * (Decimal::ONE + self.config.fee_buffer);

        let quote_hold = match self.ledger.reserve(
            &opp.buy_venue,
            self.ledger.quote_currency(),
            quote_amount,
            self.execution_id.buy_ref().as_str(),
            self.config.reserve_ttl,
        ) {
            Ok(hold) => hold,
            Err(err) => {
                return Err(self.fail("reserving", &err.to_string(), "top up quote balance or reduce position size"));
            }
        };

        let base_hold = match self.ledger.reserve(
            &opp.sell_venue,
            self.ledger.base_currency(),
            self.plan.base_amount,
            self.execution_id.sell_ref().as_str(),
            self.config.reserve_ttl,
        ) {
            Ok(hold) => hold,
            Err(err) => {
                // No compensation needed: just undo the first hold.
                let _ = self.ledger.release(&quote_hold.id);
                return Err(self.fail("reserving", &err.to_string(), "top up base balance or reduce position size"));
            }
        };

        self.quote_hold = Some(quote_hold.id);
        self.base_hold = Some(base_hold.id);
        Ok(())
    }

    // ---- Phase 2 ------------------------------------------------------

    async fn place_buy(&mut self) -> Result<Order, ExecutionOutcome> {
        let opp = self.plan.opportunity.clone();
        let client_ref = self.execution_id.buy_ref();
        match self
            .place_leg(
                Arc::clone(&self.buy_adapter),
                Side::Buy,
                self.plan.base_amount,
                opp.buy_price,
                &client_ref,
            )
            .await
        {
            Ok(order) => Ok(order),
            Err(PlaceFailure::Unresolved) => {
                self.release_holds();
                Err(self.fail(
                    "buy_place",
                    "orphaned buy placement unresolved",
                    "resolve the order on the venue by client_ref before retrying",
                ))
            }
            Err(PlaceFailure::Error(err)) => {
                self.release_holds();
                Err(self.fail("buy_place", &err.to_string(), "check venue status and balances"))
            }
        }
    }

    // ---- Phase 3 ------------------------------------------------------

    async fn fill_buy(&mut self, order: Order) -> Result<Order, ExecutionOutcome> {
        let wait = self
            .wait_fill(Arc::clone(&self.buy_adapter), order)
            .await;

        if wait.reserve_expired {
            // A hold lapsed mid-flight: cancel and stop, never proceed.
            let final_order = self
                .cancel_and_refresh(Arc::clone(&self.buy_adapter), &wait.order)
                .await;
            self.release_holds();
            let filled = final_order.filled_base();
            if filled > Decimal::ZERO {
                self.open_carry_position(&final_order, filled);
            }
            return Err(self.fail(
                "buy_fill",
                "reservation expired during fill wait",
                "execution stalled past the reservation TTL; order cancelled",
            ));
        }

        let fraction = wait.order.fill_fraction();
        if fraction >= self.config.min_fill_fraction {
            // Accept; flatten any open remainder.
            let final_order = if wait.order.state == OrderState::Filled {
                wait.order
            } else {
                self.cancel_and_refresh(Arc::clone(&self.buy_adapter), &wait.order)
                    .await
            };
            return Ok(final_order);
        }

        // Recovery: partial buy below the acceptance fraction, sell not yet
        // placed. Cancel the remainder, carry the filled base as a
        // position, release the untouched base hold.
        let final_order = self
            .cancel_and_refresh(Arc::clone(&self.buy_adapter), &wait.order)
            .await;
        let filled = final_order.filled_base();

        if filled > Decimal::ZERO {
            self.consume_quote_hold(&final_order);
            let position_id = self.open_carry_position(&final_order, filled);
            self.release_base_hold();
            self.events.emit(Event::SettlementFailed {
                execution_id: self.execution_id.to_string(),
                stage: "buy_fill",
                reason: "partial_fill".to_string(),
                remediation: "position opened for the filled base; review and unwind",
            });
            debug!(position = %position_id, "partial buy carried as position");
            Err(ExecutionOutcome::Failed {
                stage: "buy_fill",
                reason: "partial_fill".to_string(),
            })
        } else {
            self.release_holds();
            Err(self.fail(
                "buy_fill",
                "buy leg did not fill before the stage deadline",
                "no exposure taken; opportunity dropped",
            ))
        }
    }

    // ---- Phase 4 ------------------------------------------------------

    async fn place_sell(
        &mut self,
        buy_final: &Order,
        sell_amount: Decimal,
    ) -> Result<Order, ExecutionOutcome> {
        let opp = self.plan.opportunity.clone();
        let client_ref = self.execution_id.sell_ref();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self
                .place_leg(
                    Arc::clone(&self.sell_adapter),
                    Side::Sell,
                    sell_amount,
                    opp.sell_price,
                    &client_ref,
                )
                .await
            {
                Ok(order) => return Ok(order),
                Err(PlaceFailure::Unresolved) => {
                    // Buy exposure exists and the sell is unknown: position
                    // the base and hand the orphan to an operator.
                    return Err(self.abandon_sell(buy_final, "orphaned sell placement unresolved"));
                }
                Err(PlaceFailure::Error(err)) if attempt < self.config.retry_attempts => {
                    warn!(
                        attempt,
                        error = %err,
                        "sell placement failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(PlaceFailure::Error(err)) => {
                    return Err(self.abandon_sell(
                        buy_final,
                        &format!("sell placement exhausted retries: {err}"),
                    ));
                }
            }
        }
    }

    /// Sell leg abandoned after a filled buy: consume the quote hold for
    /// the actual spend, record the bought base as an open position, and
    /// fail the execution. Exactly one position, by construction.
    fn abandon_sell(&mut self, buy_final: &Order, reason: &str) -> ExecutionOutcome {
        self.consume_quote_hold(buy_final);
        let filled = buy_final.filled_base();
        let position_id = self.open_carry_position(buy_final, filled);
        self.release_base_hold();
        self.events.emit(Event::SettlementFailed {
            execution_id: self.execution_id.to_string(),
            stage: "sell_place",
            reason: reason.to_string(),
            remediation: "bought base recorded as a position; sell manually or wait for unwind",
        });
        info!(position = %position_id, reason, "sell abandoned, base positioned");
        ExecutionOutcome::Failed {
            stage: "sell_place",
            reason: reason.to_string(),
        }
    }

    // ---- Phase 5 ------------------------------------------------------

    async fn fill_sell(
        &mut self,
        buy_final: &Order,
        order: Order,
    ) -> Result<Order, ExecutionOutcome> {
        let wait = self
            .wait_fill(Arc::clone(&self.sell_adapter), order)
            .await;

        if wait.reserve_expired {
            let final_order = self
                .cancel_and_refresh(Arc::clone(&self.sell_adapter), &wait.order)
                .await;
            // Whatever sold still settles; the remainder is positioned in
            // settle(). Proceed with the refreshed order.
            return Ok(final_order);
        }

        let fraction = wait.order.fill_fraction();
        if wait.order.state == OrderState::Filled {
            return Ok(wait.order);
        }
        let final_order = self
            .cancel_and_refresh(Arc::clone(&self.sell_adapter), &wait.order)
            .await;
        if fraction < self.config.min_fill_fraction {
            debug!(
                buy = %buy_final.filled_base(),
                sold = %final_order.filled_base(),
                "sell under-filled; remainder will be positioned at settle"
            );
        }
        Ok(final_order)
    }

    // ---- Phase 6 ------------------------------------------------------

    async fn settle(&mut self, buy_final: &Order, sell_final: &Order) -> ExecutionOutcome {
        // Close reservations into realized balance deltas first, then
        // reconcile against what the venues actually report.
        self.consume_quote_hold(buy_final);
        let sell_filled = sell_final.filled_base();
        if sell_filled > Decimal::ZERO {
            if let Some(hold) = self.base_hold.take() {
                let _ = self.ledger.consume(
                    &hold,
                    sell_final.filled_quote(),
                    sell_filled,
                    sell_final.fees_quote(),
                );
            }
        } else {
            self.release_base_hold();
        }

        let buy_venue = self.plan.opportunity.buy_venue.clone();
        let sell_venue = self.plan.opportunity.sell_venue.clone();
        self.confirm_and_mirror(Arc::clone(&self.buy_adapter), &buy_venue)
            .await;
        self.confirm_and_mirror(Arc::clone(&self.sell_adapter), &sell_venue)
            .await;

        let buy_filled = buy_final.filled_base();
        let buy_cost_per_base = if buy_filled.is_zero() {
            Decimal::ZERO
        } else {
            (buy_final.filled_quote() + buy_final.fees_quote()) / buy_filled
        };
        let profit = (sell_final.filled_quote() - sell_final.fees_quote())
            - sell_filled * buy_cost_per_base;

        // Any base bought but not sold is carried as a position.
        let carry = buy_filled - sell_filled;
        let position = if carry > Decimal::ZERO {
            Some(self.open_carry_position(buy_final, carry))
        } else {
            None
        };

        self.ledger.record_trade(sell_final.filled_quote(), profit);
        self.events.emit(Event::SettlementCompleted {
            execution_id: self.execution_id.to_string(),
            profit_quote: profit,
        });

        let report = SettlementReport {
            execution_id: self.execution_id.clone(),
            profit_quote: profit,
            buy_filled_base: buy_filled,
            sell_filled_base: sell_filled,
            position: position.clone(),
        };
        if position.is_some() {
            ExecutionOutcome::CompensatedSettled(report)
        } else {
            ExecutionOutcome::Settled(report)
        }
    }

    // ---- Shared machinery ---------------------------------------------

    /// Place one leg. A `timeout` (or transient transport failure) on the
    /// placement call switches to orphan resolution: the idempotency key
    /// is looked up repeatedly until the order surfaces or the resolve
    /// deadline passes. The call itself is never repeated blindly.
    async fn place_leg(
        &mut self,
        adapter: Arc<dyn VenueAdapter>,
        side: Side,
        base_amount: Decimal,
        limit_price: Decimal,
        client_ref: &ClientRef,
    ) -> Result<Order, PlaceFailure> {
        match adapter
            .place_order(side, base_amount, limit_price, client_ref)
            .await
        {
            Ok(order) => Ok(order),
            Err(err) if err.is_transient() => {
                warn!(
                    side = %side,
                    client_ref = %client_ref,
                    error = %err,
                    "placement outcome unknown, resolving by client_ref"
                );
                self.resolve_orphan(adapter, client_ref).await
            }
            Err(err) => Err(PlaceFailure::Error(err)),
        }
    }

    /// Orphan resolution: bounded idempotent lookups, no re-placement.
    async fn resolve_orphan(
        &mut self,
        adapter: Arc<dyn VenueAdapter>,
        client_ref: &ClientRef,
    ) -> Result<Order, PlaceFailure> {
        let start = Instant::now();
        let mut timed_out_stage = false;

        loop {
            match adapter.find_order(client_ref).await {
                Ok(Some(order)) => {
                    info!(client_ref = %client_ref, order = %order.id, "orphan resolved");
                    return Ok(order);
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(client_ref = %client_ref, error = %err, "orphan lookup failed");
                }
            }

            let elapsed = start.elapsed();
            if !timed_out_stage && elapsed >= self.config.order_timeout {
                // Still unknown after the stage budget: announce recovery
                // and keep resolving up to the hard deadline.
                timed_out_stage = true;
                self.events.emit(Event::StageTimeout {
                    execution_id: self.execution_id.to_string(),
                    stage: "orphan_resolve",
                });
            }
            if elapsed >= self.config.orphan_resolve_deadline {
                warn!(client_ref = %client_ref, "orphan unresolved past deadline, escalating");
                return Err(PlaceFailure::Unresolved);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Poll an order until filled, terminal, deadline or reservation
    /// expiry.
    async fn wait_fill(&mut self, adapter: Arc<dyn VenueAdapter>, order: Order) -> WaitOutcome {
        let deadline = Instant::now() + self.config.order_timeout;
        let mut current = order;

        loop {
            if current.state == OrderState::Filled || current.state.is_terminal() {
                return WaitOutcome {
                    order: current,
                    reserve_expired: false,
                };
            }
            if !self.holds_alive() {
                return WaitOutcome {
                    order: current,
                    reserve_expired: true,
                };
            }
            if Instant::now() >= deadline {
                self.events.emit(Event::StageTimeout {
                    execution_id: self.execution_id.to_string(),
                    stage: "fill_wait",
                });
                return WaitOutcome {
                    order: current,
                    reserve_expired: false,
                };
            }

            tokio::time::sleep(self.config.poll_interval).await;
            match adapter.get_order(&current.id).await {
                Ok(order) => current = order,
                Err(err) => {
                    debug!(order = %current.id, error = %err, "fill poll failed");
                }
            }
        }
    }

    /// Cancel an order's remainder and return its final snapshot. A cancel
    /// can race a late fill, so the refreshed order is authoritative.
    async fn cancel_and_refresh(&self, adapter: Arc<dyn VenueAdapter>, order: &Order) -> Order {
        match adapter.cancel_order(&order.id).await {
            Ok(CancelOutcome::Cancelled | CancelOutcome::AlreadyTerminal) => {}
            Ok(CancelOutcome::NotFound) => {
                debug!(order = %order.id, "cancel target not found");
            }
            Err(err) => {
                warn!(order = %order.id, error = %err, "cancel failed");
            }
        }
        adapter.get_order(&order.id).await.unwrap_or_else(|_| order.clone())
    }

    /// Settlement confirmation: poll venue balances until they hold still
    /// for `confirmations` consecutive reads, then mirror the reported
    /// totals into the ledger. Bounded by the stage budget; an
    /// inconclusive confirmation leaves the ledger's own accounting in
    /// place.
    async fn confirm_and_mirror(&self, adapter: Arc<dyn VenueAdapter>, venue: &VenueId) {
        let deadline = Instant::now() + self.config.order_timeout;
        let mut last: Option<std::collections::HashMap<crate::domain::Currency, Decimal>> = None;
        let mut stable: u32 = 0;

        loop {
            match adapter.get_balances().await {
                Ok(balances) => {
                    if last.as_ref() == Some(&balances) {
                        stable += 1;
                    } else {
                        stable = 1;
                        last = Some(balances);
                    }
                    if stable >= self.config.confirmations {
                        if let Some(balances) = last {
                            for (currency, total) in balances {
                                let _ = self.ledger.update_balance(venue, &currency, total);
                            }
                        }
                        return;
                    }
                }
                Err(err) => {
                    debug!(venue = %venue, error = %err, "balance confirmation read failed");
                }
            }
            if Instant::now() >= deadline {
                warn!(venue = %venue, "settlement confirmation inconclusive");
                return;
            }
            tokio::time::sleep(self.config.confirmation_interval).await;
        }
    }

    fn holds_alive(&self) -> bool {
        let quote_ok = self
            .quote_hold
            .as_ref()
            .is_some_and(|id| self.ledger.reservation_live(id));
        let base_ok = self
            .base_hold
            .as_ref()
            .is_some_and(|id| self.ledger.reservation_live(id));
        quote_ok && base_ok
    }

    fn consume_quote_hold(&mut self, buy_final: &Order) {
        if let Some(hold) = self.quote_hold.take() {
            let _ = self.ledger.consume(
                &hold,
                buy_final.filled_quote(),
                buy_final.filled_base(),
                buy_final.fees_quote(),
            );
        }
    }

    fn release_base_hold(&mut self) {
        if let Some(hold) = self.base_hold.take() {
            let _ = self.ledger.release(&hold);
        }
    }

    fn release_holds(&mut self) {
        if let Some(hold) = self.quote_hold.take() {
            let _ = self.ledger.release(&hold);
        }
        self.release_base_hold();
    }

    fn open_carry_position(&self, buy_final: &Order, base_amount: Decimal) -> PositionId {
        let venue: VenueId = self.plan.opportunity.buy_venue.clone();
        let position = self.ledger.open_position(
            &venue,
            Side::Buy,
            base_amount,
            buy_final.avg_fill_price(),
        );
        position.id
    }

    fn stage_started(&self, stage: &'static str) {
        self.events.emit(Event::StageStarted {
            execution_id: self.execution_id.to_string(),
            stage,
        });
    }

    fn stage_completed(&self, stage: &'static str) {
        self.events.emit(Event::StageCompleted {
            execution_id: self.execution_id.to_string(),
            stage,
        });
    }

    fn check_warning(&mut self) {
        if self.warned {
            return;
        }
        let budget = self.config.settlement_timeout.as_secs_f64();
        let elapsed = self.started.elapsed().as_secs_f64();
        if budget > 0.0 && elapsed >= budget * self.config.warning_threshold {
            self.warned = true;
            self.events.emit(Event::ExecutionWarning {
                execution_id: self.execution_id.to_string(),
                elapsed_ms: (elapsed * 1000.0) as u64,
            });
        }
    }

    fn fail(&self, stage: &'static str, reason: &str, remediation: &'static str) -> ExecutionOutcome {
        self.events.emit(Event::SettlementFailed {
            execution_id: self.execution_id.to_string(),
            stage,
            reason: reason.to_string(),
            remediation,
        });
        ExecutionOutcome::Failed {
            stage,
            reason: reason.to_string(),
        }
    }
}

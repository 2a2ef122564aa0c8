//! Scripted mock venue adapter.
//!
//! Behavior is driven by per-call scripts so tests can stage fills,
//! partials, timeouts and orphaned orders deterministically. Every
//! placement is recorded, which is what lets tests assert the
//! no-double-place guarantee.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::domain::{
    ClientRef, Currency, DepthLevel, FeeSchedule, Fill, Order, OrderBookDepth, OrderId,
    OrderState, Side, Tick, TickSource, VenueId,
};
use crate::error::VenueError;
use crate::venue::{
    Capability, CancelOutcome, StreamEvent, VenueAdapter, VenueInfo, VenueStream,
};

/// What one `place_order` call should do.
#[derive(Debug, Clone)]
pub enum PlaceScript {
    /// Accept and fill `fraction` of the requested base immediately. A
    /// fraction below one leaves the order in `Partial` forever.
    Fill { fraction: Decimal },
    /// Accept; `get_order` reports `Open` until it has been polled
    /// `polls` times, then the order fills at `fraction`.
    FillAfterPolls { fraction: Decimal, polls: u32 },
    /// Return `Timeout` from the placement call, but the order actually
    /// reached the venue and fills at `fraction`. It becomes visible to
    /// `find_order` after `visible_after` lookups.
    OrphanFill { fraction: Decimal, visible_after: u32 },
    /// Return `Timeout` and no order ever existed.
    TimeoutNoOrder,
    /// Fail the placement outright.
    Fail(VenueError),
}

impl PlaceScript {
    /// Full immediate fill.
    #[must_use]
    pub fn fill() -> Self {
        Self::Fill {
            fraction: Decimal::ONE,
        }
    }
}

#[derive(Debug)]
struct ScriptedOrder {
    order: Order,
    /// Remaining `get_order` polls before the fill lands.
    pending_polls: u32,
    /// Fraction to fill once polls run out.
    pending_fraction: Decimal,
    /// Remaining `find_order` lookups before the order becomes visible.
    hidden_for: u32,
}

#[derive(Debug, Default)]
struct MockState {
    ticker_price: Option<Decimal>,
    depth: Option<OrderBookDepth>,
    balances: HashMap<Currency, Decimal>,
    fees: FeeSchedule,
    orders: HashMap<OrderId, ScriptedOrder>,
    by_ref: HashMap<ClientRef, OrderId>,
    place_scripts: VecDeque<PlaceScript>,
    placements: Vec<ClientRef>,
    stream_events: VecDeque<StreamEvent>,
    pong_on_ping: bool,
    next_seq: u64,
}

/// Builder for [`MockVenue`].
pub struct MockVenueBuilder {
    id: VenueId,
    base: Currency,
    quote: Currency,
    streaming: bool,
    state: MockState,
}

/// A fully scripted venue.
pub struct MockVenue {
    info: VenueInfo,
    base: Currency,
    state: Arc<Mutex<MockState>>,
}

impl MockVenue {
    #[must_use]
    pub fn builder(id: &str, quote: &str) -> MockVenueBuilder {
        MockVenueBuilder {
            id: VenueId::new(id),
            base: Currency::new("TON"),
            quote: Currency::new(quote),
            streaming: true,
            state: MockState {
                fees: FeeSchedule::new(Decimal::new(1, 3), Decimal::new(2, 3)),
                pong_on_ping: true,
                ..MockState::default()
            },
        }
    }

    /// Client refs of every placement, in order.
    #[must_use]
    pub fn placements(&self) -> Vec<ClientRef> {
        self.state.lock().placements.clone()
    }

    /// Set (or start answering) the ticker after construction.
    pub fn set_ticker(&self, price: Decimal) {
        self.state.lock().ticker_price = Some(price);
    }

    /// Push a stream event for a live subscriber to pick up.
    pub fn push_stream_event(&self, event: StreamEvent) {
        self.state.lock().stream_events.push_back(event);
    }

    /// Current mock balance for a currency.
    #[must_use]
    pub fn balance(&self, currency: &Currency) -> Decimal {
        self.state
            .lock()
            .balances
            .get(currency)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Snapshot of an order by client ref, however the venue sees it.
    #[must_use]
    pub fn order_by_ref(&self, client_ref: &ClientRef) -> Option<Order> {
        let state = self.state.lock();
        let id = state.by_ref.get(client_ref)?;
        state.orders.get(id).map(|s| s.order.clone())
    }

    fn apply_fill(state: &mut MockState, base_ccy: &Currency, quote_ccy: &Currency, id: &OrderId) {
        let Some(scripted) = state.orders.get_mut(id) else {
            return;
        };
        if scripted.pending_fraction.is_zero() {
            return;
        }
        let order = &mut scripted.order;
        let base = order.base_amount * scripted.pending_fraction;
        let quote = base * order.limit_price;
        let fee = quote * state.fees.taker;
        order.fills.push(Fill {
            base_amount: base,
            quote_amount: quote,
            fee_quote: fee,
            ts: Utc::now(),
        });
        order.state = if scripted.pending_fraction >= Decimal::ONE {
            OrderState::Filled
        } else {
            OrderState::Partial
        };
        order.updated_ts = Utc::now();
        scripted.pending_fraction = Decimal::ZERO;

        // Keep venue balances consistent with the fill.
        let (debit, debit_amt, credit, credit_amt) = match order.side {
            Side::Buy => (quote_ccy.clone(), quote + fee, base_ccy.clone(), base),
            Side::Sell => (base_ccy.clone(), base, quote_ccy.clone(), quote - fee),
        };
        *state.balances.entry(debit).or_insert(Decimal::ZERO) -= debit_amt;
        *state.balances.entry(credit).or_insert(Decimal::ZERO) += credit_amt;
    }
}

impl MockVenueBuilder {
    /// Set the base currency (default TON).
    #[must_use]
    pub fn base(mut self, base: &str) -> Self {
        self.base = Currency::new(base);
        self
    }

    /// Disable the streaming capability; the worker will poll.
    #[must_use]
    pub fn without_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    /// Price returned by `fetch_ticker`.
    #[must_use]
    pub fn ticker(mut self, price: Decimal) -> Self {
        self.state.ticker_price = Some(price);
        self
    }

    /// Depth returned by `fetch_depth`.
    #[must_use]
    pub fn depth(mut self, depth: OrderBookDepth) -> Self {
        self.state.depth = Some(depth);
        self
    }

    /// Symmetric depth helper: `size` base available at `bid`/`ask`.
    #[must_use]
    pub fn depth_levels(self, bid: Decimal, ask: Decimal, size: Decimal) -> Self {
        self.depth(OrderBookDepth::new(
            vec![DepthLevel::new(bid, size)],
            vec![DepthLevel::new(ask, size)],
        ))
    }

    /// Seed a balance.
    #[must_use]
    pub fn balance(mut self, currency: &str, amount: Decimal) -> Self {
        self.state.balances.insert(Currency::new(currency), amount);
        self
    }

    /// Override the fee schedule.
    #[must_use]
    pub fn fees(mut self, fees: FeeSchedule) -> Self {
        self.state.fees = fees;
        self
    }

    /// Queue the script for the next `place_order` call. Defaults to a
    /// full immediate fill once the queue is empty.
    #[must_use]
    pub fn on_place(mut self, script: PlaceScript) -> Self {
        self.state.place_scripts.push_back(script);
        self
    }

    /// Queue stream events delivered by `subscribe`'s stream.
    #[must_use]
    pub fn stream_events(mut self, events: Vec<StreamEvent>) -> Self {
        self.state.stream_events = events.into();
        self
    }

    #[must_use]
    pub fn build(self) -> MockVenue {
        let mut capabilities = vec![
            Capability::Orderbook,
            Capability::PlaceOrder,
            Capability::CancelOrder,
            Capability::Balance,
            Capability::Fees,
        ];
        if self.streaming {
            capabilities.push(Capability::Streaming);
        }
        MockVenue {
            info: VenueInfo::new(self.id, self.quote, capabilities),
            base: self.base,
            state: Arc::new(Mutex::new(self.state)),
        }
    }
}

#[async_trait]
impl VenueAdapter for MockVenue {
    fn info(&self) -> &VenueInfo {
        &self.info
    }

    async fn subscribe(&self) -> Result<Box<dyn VenueStream>, VenueError> {
        if !self.info.supports(Capability::Streaming) {
            return Err(VenueError::PreconditionFailed("no streaming".to_string()));
        }
        Ok(Box::new(MockStream {
            state: Arc::clone(&self.state),
        }))
    }

    async fn fetch_ticker(&self) -> Result<Tick, VenueError> {
        let state = self.state.lock();
        let price = state
            .ticker_price
            .ok_or_else(|| VenueError::NotFound("no ticker scripted".to_string()))?;
        let now = Utc::now();
        Ok(Tick {
            venue: self.info.id.clone(),
            price,
            quote: self.info.quote.clone(),
            bid: Some(price - Decimal::new(1, 2)),
            ask: Some(price + Decimal::new(1, 2)),
            last_trade_ts: now,
            received_ts: now,
            volume_quote_24h: Some(Decimal::from(100_000)),
            source: TickSource::Poll,
        })
    }

    async fn fetch_depth(&self, _levels: usize) -> Result<OrderBookDepth, VenueError> {
        self.state
            .lock()
            .depth
            .clone()
            .ok_or_else(|| VenueError::NotFound("no depth scripted".to_string()))
    }

    async fn place_order(
        &self,
        side: Side,
        base_amount: Decimal,
        limit_price: Decimal,
        client_ref: &ClientRef,
    ) -> Result<Order, VenueError> {
        let mut state = self.state.lock();
        state.placements.push(client_ref.clone());

        // Idempotency: a replayed ref returns the existing order.
        if let Some(existing) = state.by_ref.get(client_ref) {
            let existing = existing.clone();
            return Ok(state.orders[&existing].order.clone());
        }

        let script = state
            .place_scripts
            .pop_front()
            .unwrap_or_else(PlaceScript::fill);

        let now = Utc::now();
        state.next_seq += 1;
        let order_id = OrderId::new(format!("{}-{}", self.info.id, state.next_seq));
        let order = Order {
            id: order_id.clone(),
            client_ref: client_ref.clone(),
            venue: self.info.id.clone(),
            side,
            base_amount,
            limit_price,
            state: OrderState::Open,
            fills: Vec::new(),
            created_ts: now,
            updated_ts: now,
        };

        match script {
            PlaceScript::Fill { fraction } => {
                state.orders.insert(
                    order_id.clone(),
                    ScriptedOrder {
                        order,
                        pending_polls: 0,
                        pending_fraction: fraction,
                        hidden_for: 0,
                    },
                );
                state.by_ref.insert(client_ref.clone(), order_id.clone());
                Self::apply_fill(&mut state, &self.base, &self.info.quote, &order_id);
                Ok(state.orders[&order_id].order.clone())
            }
            PlaceScript::FillAfterPolls { fraction, polls } => {
                state.orders.insert(
                    order_id.clone(),
                    ScriptedOrder {
                        order: order.clone(),
                        pending_polls: polls,
                        pending_fraction: fraction,
                        hidden_for: 0,
                    },
                );
                state.by_ref.insert(client_ref.clone(), order_id);
                Ok(order)
            }
            PlaceScript::OrphanFill {
                fraction,
                visible_after,
            } => {
                state.orders.insert(
                    order_id.clone(),
                    ScriptedOrder {
                        order,
                        pending_polls: 0,
                        pending_fraction: fraction,
                        hidden_for: visible_after,
                    },
                );
                state.by_ref.insert(client_ref.clone(), order_id.clone());
                Self::apply_fill(&mut state, &self.base, &self.info.quote, &order_id);
                Err(VenueError::Timeout)
            }
            PlaceScript::TimeoutNoOrder => Err(VenueError::Timeout),
            PlaceScript::Fail(err) => Err(err),
        }
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<CancelOutcome, VenueError> {
        let mut state = self.state.lock();
        match state.orders.get_mut(order_id) {
            None => Ok(CancelOutcome::NotFound),
            Some(scripted) if scripted.order.state.is_terminal() => {
                Ok(CancelOutcome::AlreadyTerminal)
            }
            Some(scripted) => {
                scripted.order.state = OrderState::Cancelled;
                scripted.order.updated_ts = Utc::now();
                scripted.pending_polls = 0;
                Ok(CancelOutcome::Cancelled)
            }
        }
    }

    async fn get_order(&self, order_id: &OrderId) -> Result<Order, VenueError> {
        let mut state = self.state.lock();
        let fill_now = {
            let scripted = state
                .orders
                .get_mut(order_id)
                .ok_or_else(|| VenueError::NotFound(order_id.to_string()))?;
            if scripted.pending_polls > 0 {
                scripted.pending_polls -= 1;
                scripted.pending_polls == 0
            } else {
                false
            }
        };
        if fill_now {
            Self::apply_fill(&mut state, &self.base, &self.info.quote, order_id);
        }
        Ok(state.orders[order_id].order.clone())
    }

    async fn find_order(&self, client_ref: &ClientRef) -> Result<Option<Order>, VenueError> {
        let mut state = self.state.lock();
        let Some(order_id) = state.by_ref.get(client_ref).cloned() else {
            return Ok(None);
        };
        let scripted = state.orders.get_mut(&order_id).expect("ref maps to order");
        if scripted.hidden_for > 0 {
            scripted.hidden_for -= 1;
            return Ok(None);
        }
        Ok(Some(scripted.order.clone()))
    }

    async fn get_balances(&self) -> Result<HashMap<Currency, Decimal>, VenueError> {
        Ok(self.state.lock().balances.clone())
    }

    async fn get_fees(&self) -> Result<FeeSchedule, VenueError> {
        Ok(self.state.lock().fees)
    }
}

struct MockStream {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl VenueStream for MockStream {
    async fn next(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.state.lock().stream_events.pop_front() {
                return Some(event);
            }
            // Stay pending like a quiet socket.
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    async fn ping(&mut self) -> Result<(), VenueError> {
        let mut state = self.state.lock();
        if state.pong_on_ping {
            state.stream_events.push_back(StreamEvent::Pong);
        }
        Ok(())
    }
}

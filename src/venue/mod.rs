//! Venue abstraction layer.
//!
//! [`VenueAdapter`] is the capability set every venue integration must
//! satisfy. Adapters normalize one venue's stream and request/response
//! semantics; consumers never see venue-native shapes. Reconnection policy
//! is owned by the ingestion fabric, not the adapter: a stream disconnect
//! surfaces as [`StreamEvent::Closed`] and the adapter's job ends there.

mod clob;
mod messages;

pub use clob::{ClobVenue, ClobVenueConfig};

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{
    ClientRef, Currency, FeeSchedule, Order, OrderBookDepth, OrderId, Side, Tick, VenueId,
};
use crate::error::VenueError;

/// A capability a venue may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Streaming,
    Orderbook,
    PlaceOrder,
    CancelOrder,
    Balance,
    Fees,
}

/// Static identity and capability set of a venue.
#[derive(Debug, Clone)]
pub struct VenueInfo {
    pub id: VenueId,
    /// Currency this venue quotes prices in (not necessarily canonical).
    pub quote: Currency,
    pub capabilities: HashSet<Capability>,
}

impl VenueInfo {
    #[must_use]
    pub fn new(id: VenueId, quote: Currency, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            id,
            quote,
            capabilities: capabilities.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
    /// The order had already reached a terminal state.
    AlreadyTerminal,
}

/// Events surfaced by a venue stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Tick(Tick),
    /// Reply to a [`VenueStream::ping`].
    Pong,
    /// The stream ended; the ingestion fabric decides what happens next.
    Closed { reason: String },
}

/// Handle onto a live venue stream.
#[async_trait]
pub trait VenueStream: Send {
    /// Next event, or `None` once the stream is exhausted after `Closed`.
    async fn next(&mut self) -> Option<StreamEvent>;

    /// Send a keepalive probe; the reply arrives as [`StreamEvent::Pong`].
    async fn ping(&mut self) -> Result<(), VenueError>;
}

/// The uniform capability interface over one venue.
///
/// Every method is cancellation-safe: an aborted call must not leave an
/// unaccounted side effect. For `place_order` specifically, a timeout with
/// unknown outcome must be resolvable through [`VenueAdapter::find_order`]
/// with the same `client_ref` — adapters for venues without native
/// idempotency keys implement that lookup synthetically (e.g. by scanning
/// recent orders) before any re-placement.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Identity, quote currency and supported capabilities.
    fn info(&self) -> &VenueInfo;

    /// Open the push stream of venue-native ticks.
    async fn subscribe(&self) -> Result<Box<dyn VenueStream>, VenueError>;

    /// Pull fallback for venues (or moments) without a stream.
    async fn fetch_ticker(&self) -> Result<Tick, VenueError>;

    /// Order book depth, up to `levels` levels per side.
    async fn fetch_depth(&self, levels: usize) -> Result<OrderBookDepth, VenueError>;

    /// Place a limit order. `client_ref` is the idempotency key: the venue
    /// must attribute retries carrying the same ref to one logical order.
    async fn place_order(
        &self,
        side: Side,
        base_amount: Decimal,
        limit_price: Decimal,
        client_ref: &ClientRef,
    ) -> Result<Order, VenueError>;

    async fn cancel_order(&self, order_id: &OrderId) -> Result<CancelOutcome, VenueError>;

    async fn get_order(&self, order_id: &OrderId) -> Result<Order, VenueError>;

    /// Resolve an order by its idempotency key. `Ok(None)` means the venue
    /// never saw a placement with this ref.
    async fn find_order(&self, client_ref: &ClientRef) -> Result<Option<Order>, VenueError>;

    async fn get_balances(&self) -> Result<HashMap<Currency, Decimal>, VenueError>;

    async fn get_fees(&self) -> Result<FeeSchedule, VenueError>;
}

//! Wire DTOs for the generic CLOB venue.
//!
//! Decimal fields arrive as strings on both the REST and stream surfaces;
//! parsing failures map to `VenueError::InvalidResponse` at the call site.

use serde::{Deserialize, Serialize};

/// Subscription request sent after the stream opens.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeMessage {
    pub op: &'static str,
    pub symbol: String,
}

impl SubscribeMessage {
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            op: "subscribe",
            symbol: symbol.into(),
        }
    }
}

/// Messages the stream can deliver.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    Ticker(TickerMessage),
    Pong,
    /// Anything we do not consume; kept so unknown frames parse cleanly.
    #[serde(other)]
    Unknown,
}

/// A streamed ticker update.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerMessage {
    pub symbol: String,
    pub last: String,
    #[serde(default)]
    pub bid: Option<String>,
    #[serde(default)]
    pub ask: Option<String>,
    /// Milliseconds since epoch of the last trade.
    pub ts: i64,
    #[serde(default)]
    pub volume_quote_24h: Option<String>,
}

/// REST ticker payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerResponse {
    pub symbol: String,
    pub last: String,
    #[serde(default)]
    pub bid: Option<String>,
    #[serde(default)]
    pub ask: Option<String>,
    pub ts: i64,
    #[serde(default)]
    pub volume_quote_24h: Option<String>,
}

/// REST depth payload: `[price, size]` string pairs per side.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthResponse {
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

/// REST order payload.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub client_ref: String,
    pub side: String,
    pub base_amount: String,
    pub limit_price: String,
    pub status: String,
    #[serde(default)]
    pub fills: Vec<FillResponse>,
    pub created_ts: i64,
    pub updated_ts: i64,
}

/// One fill inside an order payload.
#[derive(Debug, Clone, Deserialize)]
pub struct FillResponse {
    pub base_amount: String,
    pub quote_amount: String,
    pub fee_quote: String,
    pub ts: i64,
}

/// Request body for order placement.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceOrderRequest {
    pub symbol: String,
    pub side: String,
    pub base_amount: String,
    pub limit_price: String,
    pub client_ref: String,
}

/// REST balances payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BalancesResponse {
    pub balances: Vec<BalanceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceEntry {
    pub currency: String,
    pub total: String,
}

/// REST fee schedule payload.
#[derive(Debug, Clone, Deserialize)]
pub struct FeesResponse {
    pub maker: String,
    pub taker: String,
}

//! Generic CLOB venue adapter over REST + WebSocket.
//!
//! Covers the family of centralized order-book venues this system trades
//! on: a JSON REST surface for orders/balances/depth and a streaming feed
//! for tickers. Venue-specific details (endpoints, symbol, quote currency)
//! are configuration; anything this adapter cannot express gets its own
//! [`VenueAdapter`](super::VenueAdapter) implementation.
//!
//! The REST side passes `client_ref` through as the venue's client order
//! id, and [`find_order`](super::VenueAdapter::find_order) resolves it via
//! a by-ref lookup — the idempotency contract the executor depends on.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client as HttpClient, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::messages::{
    BalancesResponse, DepthResponse, FeesResponse, OrderResponse, PlaceOrderRequest,
    SubscribeMessage, TickerMessage, TickerResponse, WsMessage,
};
use super::{Capability, CancelOutcome, StreamEvent, VenueAdapter, VenueInfo, VenueStream};
use crate::domain::{
    ClientRef, Currency, DepthLevel, FeeSchedule, Fill, Order, OrderBookDepth, OrderId,
    OrderState, Side, Tick, TickSource, VenueId,
};
use crate::error::VenueError;

/// Configuration for one CLOB venue.
#[derive(Debug, Clone)]
pub struct ClobVenueConfig {
    pub id: VenueId,
    /// Quote currency of the venue's book (e.g. USDT, BTC).
    pub quote: Currency,
    /// Venue-native symbol for the pair (e.g. `TON-USDT`).
    pub symbol: String,
    pub rest_url: String,
    pub ws_url: String,
    /// API key sent as a bearer header; loaded from env, never config files.
    pub api_key: Option<String>,
    /// Per-request deadline.
    pub request_timeout_ms: u64,
}

/// REST + WebSocket adapter for a generic order-book venue.
pub struct ClobVenue {
    info: VenueInfo,
    config: ClobVenueConfig,
    http: HttpClient,
}

impl ClobVenue {
    /// Build the adapter; the HTTP client carries the request deadline.
    #[must_use]
    pub fn new(config: ClobVenueConfig) -> Self {
        let http = HttpClient::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .unwrap_or_else(|err| {
                warn!(error = %err, "failed to build HTTP client, using defaults");
                HttpClient::new()
            });

        let info = VenueInfo::new(
            config.id.clone(),
            config.quote.clone(),
            [
                Capability::Streaming,
                Capability::Orderbook,
                Capability::PlaceOrder,
                Capability::CancelOrder,
                Capability::Balance,
                Capability::Fees,
            ],
        );

        Self { info, config, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.rest_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, VenueError> {
        let mut req = self.http.get(self.url(path));
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await.map_err(map_reqwest_error)?;
        Self::decode(response).await
    }

    async fn post_json<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, VenueError> {
        let mut req = self.http.post(self.url(path)).json(body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await.map_err(map_reqwest_error)?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, VenueError> {
        match response.status() {
            status if status.is_success() => response
                .json::<T>()
                .await
                .map_err(|e| VenueError::InvalidResponse(e.to_string())),
            StatusCode::TOO_MANY_REQUESTS => {
                Err(VenueError::RateLimited("HTTP 429".to_string()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(VenueError::Auth(format!("HTTP {}", response.status())))
            }
            StatusCode::NOT_FOUND => Err(VenueError::NotFound("HTTP 404".to_string())),
            status if status.is_server_error() => Err(VenueError::VenueDown),
            status => Err(VenueError::PreconditionFailed(format!("HTTP {status}"))),
        }
    }

    fn tick_from_ticker(
        &self,
        last: &str,
        bid: Option<&str>,
        ask: Option<&str>,
        ts_ms: i64,
        volume: Option<&str>,
        source: TickSource,
    ) -> Result<Tick, VenueError> {
        Ok(Tick {
            venue: self.info.id.clone(),
            price: parse_decimal(last)?,
            quote: self.config.quote.clone(),
            bid: bid.map(parse_decimal).transpose()?,
            ask: ask.map(parse_decimal).transpose()?,
            last_trade_ts: millis_to_utc(ts_ms)?,
            received_ts: Utc::now(),
            volume_quote_24h: volume.map(parse_decimal).transpose()?,
            source,
        })
    }

    fn order_from_response(&self, resp: OrderResponse) -> Result<Order, VenueError> {
        let side = match resp.side.as_str() {
            "buy" => Side::Buy,
            "sell" => Side::Sell,
            other => {
                return Err(VenueError::InvalidResponse(format!(
                    "unknown side: {other}"
                )))
            }
        };
        let state = match resp.status.as_str() {
            "pending" => OrderState::Pending,
            "open" => OrderState::Open,
            "partial" => OrderState::Partial,
            "filled" => OrderState::Filled,
            "cancelled" => OrderState::Cancelled,
            "failed" | "rejected" => OrderState::Failed,
            other => {
                return Err(VenueError::InvalidResponse(format!(
                    "unknown order status: {other}"
                )))
            }
        };
        let fills = resp
            .fills
            .into_iter()
            .map(|f| {
                Ok(Fill {
                    base_amount: parse_decimal(&f.base_amount)?,
                    quote_amount: parse_decimal(&f.quote_amount)?,
                    fee_quote: parse_decimal(&f.fee_quote)?,
                    ts: millis_to_utc(f.ts)?,
                })
            })
            .collect::<Result<Vec<_>, VenueError>>()?;

        Ok(Order {
            id: OrderId::new(resp.order_id),
            client_ref: ClientRef::new(resp.client_ref),
            venue: self.info.id.clone(),
            side,
            base_amount: parse_decimal(&resp.base_amount)?,
            limit_price: parse_decimal(&resp.limit_price)?,
            state,
            fills,
            created_ts: millis_to_utc(resp.created_ts)?,
            updated_ts: millis_to_utc(resp.updated_ts)?,
        })
    }
}

#[async_trait]
impl VenueAdapter for ClobVenue {
    fn info(&self) -> &VenueInfo {
        &self.info
    }

    async fn subscribe(&self) -> Result<Box<dyn VenueStream>, VenueError> {
        info!(venue = %self.info.id, url = %self.config.ws_url, "connecting stream");
        let (mut ws, response) = connect_async(&self.config.ws_url)
            .await
            .map_err(|e| VenueError::Transport(e.to_string()))?;
        debug!(venue = %self.info.id, status = %response.status(), "stream connected");

        let subscribe = SubscribeMessage::new(self.config.symbol.clone());
        let json = serde_json::to_string(&subscribe)
            .map_err(|e| VenueError::InvalidResponse(e.to_string()))?;
        ws.send(Message::Text(json))
            .await
            .map_err(|e| VenueError::Transport(e.to_string()))?;

        Ok(Box::new(ClobStream {
            venue: self.info.id.clone(),
            quote: self.config.quote.clone(),
            symbol: self.config.symbol.clone(),
            ws,
        }))
    }

    async fn fetch_ticker(&self) -> Result<Tick, VenueError> {
        let resp: TickerResponse = self
            .get_json(&format!("v1/ticker/{}", self.config.symbol))
            .await?;
        self.tick_from_ticker(
            &resp.last,
            resp.bid.as_deref(),
            resp.ask.as_deref(),
            resp.ts,
            resp.volume_quote_24h.as_deref(),
            TickSource::Poll,
        )
    }

    async fn fetch_depth(&self, levels: usize) -> Result<OrderBookDepth, VenueError> {
        let resp: DepthResponse = self
            .get_json(&format!("v1/depth/{}?levels={levels}", self.config.symbol))
            .await?;
        let parse_side = |side: Vec<[String; 2]>| {
            side.into_iter()
                .map(|[price, size]| Ok(DepthLevel::new(parse_decimal(&price)?, parse_decimal(&size)?)))
                .collect::<Result<Vec<_>, VenueError>>()
        };
        Ok(OrderBookDepth::new(
            parse_side(resp.bids)?,
            parse_side(resp.asks)?,
        ))
    }

    async fn place_order(
        &self,
        side: Side,
        base_amount: Decimal,
        limit_price: Decimal,
        client_ref: &ClientRef,
    ) -> Result<Order, VenueError> {
        let request = PlaceOrderRequest {
            symbol: self.config.symbol.clone(),
            side: side.to_string(),
            base_amount: base_amount.to_string(),
            limit_price: limit_price.to_string(),
            client_ref: client_ref.as_str().to_string(),
        };
        info!(
            venue = %self.info.id,
            side = %side,
            base = %base_amount,
            limit = %limit_price,
            client_ref = %client_ref,
            "placing order"
        );
        let resp: OrderResponse = self.post_json("v1/orders", &request).await?;
        self.order_from_response(resp)
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<CancelOutcome, VenueError> {
        let mut req = self
            .http
            .delete(self.url(&format!("v1/orders/{order_id}")));
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await.map_err(map_reqwest_error)?;
        match response.status() {
            status if status.is_success() => Ok(CancelOutcome::Cancelled),
            StatusCode::NOT_FOUND => Ok(CancelOutcome::NotFound),
            StatusCode::CONFLICT => Ok(CancelOutcome::AlreadyTerminal),
            StatusCode::TOO_MANY_REQUESTS => Err(VenueError::RateLimited("HTTP 429".to_string())),
            status if status.is_server_error() => Err(VenueError::VenueDown),
            status => Err(VenueError::PreconditionFailed(format!("HTTP {status}"))),
        }
    }

    async fn get_order(&self, order_id: &OrderId) -> Result<Order, VenueError> {
        let resp: OrderResponse = self.get_json(&format!("v1/orders/{order_id}")).await?;
        self.order_from_response(resp)
    }

    async fn find_order(&self, client_ref: &ClientRef) -> Result<Option<Order>, VenueError> {
        match self
            .get_json::<OrderResponse>(&format!("v1/orders/by-ref/{client_ref}"))
            .await
        {
            Ok(resp) => Ok(Some(self.order_from_response(resp)?)),
            Err(VenueError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_balances(&self) -> Result<HashMap<Currency, Decimal>, VenueError> {
        let resp: BalancesResponse = self.get_json("v1/balances").await?;
        resp.balances
            .into_iter()
            .map(|entry| Ok((Currency::new(entry.currency), parse_decimal(&entry.total)?)))
            .collect()
    }

    async fn get_fees(&self) -> Result<FeeSchedule, VenueError> {
        let resp: FeesResponse = self.get_json("v1/fees").await?;
        Ok(FeeSchedule::new(
            parse_decimal(&resp.maker)?,
            parse_decimal(&resp.taker)?,
        ))
    }
}

/// Live WebSocket stream for one CLOB venue.
struct ClobStream {
    venue: VenueId,
    quote: Currency,
    symbol: String,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl VenueStream for ClobStream {
    async fn next(&mut self) -> Option<StreamEvent> {
        loop {
            let msg = self.ws.next().await?;
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<WsMessage>(&text) {
                    Ok(WsMessage::Ticker(ticker)) => {
                        if ticker.symbol != self.symbol {
                            continue;
                        }
                        match self.tick_from(&ticker) {
                            Ok(tick) => return Some(StreamEvent::Tick(tick)),
                            Err(e) => {
                                warn!(venue = %self.venue, error = %e, "bad ticker frame");
                            }
                        }
                    }
                    Ok(WsMessage::Pong) => return Some(StreamEvent::Pong),
                    Ok(WsMessage::Unknown) => {}
                    Err(e) => {
                        warn!(venue = %self.venue, error = %e, raw = %text, "unparseable frame");
                    }
                },
                Ok(Message::Ping(data)) => {
                    // Protocol-level keepalive; answer and move on.
                    if self.ws.send(Message::Pong(data)).await.is_err() {
                        return Some(StreamEvent::Closed {
                            reason: "pong send failed".to_string(),
                        });
                    }
                }
                Ok(Message::Pong(_)) => return Some(StreamEvent::Pong),
                Ok(Message::Close(frame)) => {
                    return Some(StreamEvent::Closed {
                        reason: frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "server close".to_string()),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    return Some(StreamEvent::Closed {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn ping(&mut self) -> Result<(), VenueError> {
        self.ws
            .send(Message::Text(r#"{"op":"ping"}"#.to_string()))
            .await
            .map_err(|e| VenueError::Transport(e.to_string()))
    }
}

impl ClobStream {
    fn tick_from(&self, ticker: &TickerMessage) -> Result<Tick, VenueError> {
        Ok(Tick {
            venue: self.venue.clone(),
            price: parse_decimal(&ticker.last)?,
            quote: self.quote.clone(),
            bid: ticker.bid.as_deref().map(parse_decimal).transpose()?,
            ask: ticker.ask.as_deref().map(parse_decimal).transpose()?,
            last_trade_ts: millis_to_utc(ticker.ts)?,
            received_ts: Utc::now(),
            volume_quote_24h: ticker
                .volume_quote_24h
                .as_deref()
                .map(parse_decimal)
                .transpose()?,
            source: TickSource::Stream,
        })
    }
}

fn parse_decimal(s: &str) -> Result<Decimal, VenueError> {
    Decimal::from_str(s).map_err(|e| VenueError::InvalidResponse(format!("bad decimal {s:?}: {e}")))
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>, VenueError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| VenueError::InvalidResponse(format!("bad timestamp: {ms}")))
}

fn map_reqwest_error(err: reqwest::Error) -> VenueError {
    if err.is_timeout() {
        VenueError::Timeout
    } else {
        VenueError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::messages::FillResponse;

    fn venue() -> ClobVenue {
        ClobVenue::new(ClobVenueConfig {
            id: VenueId::new("north"),
            quote: Currency::new("USDT"),
            symbol: "TON-USDT".to_string(),
            rest_url: "https://api.north.example".to_string(),
            ws_url: "wss://stream.north.example/ws".to_string(),
            api_key: None,
            request_timeout_ms: 15_000,
        })
    }

    #[test]
    fn order_response_maps_to_domain() {
        let v = venue();
        let resp = OrderResponse {
            order_id: "o-9".to_string(),
            client_ref: "exec-1-buy".to_string(),
            side: "buy".to_string(),
            base_amount: "100".to_string(),
            limit_price: "5.00".to_string(),
            status: "partial".to_string(),
            fills: vec![FillResponse {
                base_amount: "40".to_string(),
                quote_amount: "200".to_string(),
                fee_quote: "0.2".to_string(),
                ts: 1_700_000_000_000,
            }],
            created_ts: 1_700_000_000_000,
            updated_ts: 1_700_000_001_000,
        };
        let order = v.order_from_response(resp).unwrap();
        assert_eq!(order.state, OrderState::Partial);
        assert_eq!(order.filled_base(), Decimal::from(40));
        assert_eq!(order.client_ref.as_str(), "exec-1-buy");
    }

    #[test]
    fn unknown_status_is_invalid_response() {
        let v = venue();
        let resp = OrderResponse {
            order_id: "o-9".to_string(),
            client_ref: "r".to_string(),
            side: "buy".to_string(),
            base_amount: "1".to_string(),
            limit_price: "1".to_string(),
            status: "levitating".to_string(),
            fills: vec![],
            created_ts: 0,
            updated_ts: 0,
        };
        assert!(matches!(
            v.order_from_response(resp),
            Err(VenueError::InvalidResponse(_))
        ));
    }

    #[test]
    fn bad_decimal_is_invalid_response() {
        assert!(matches!(
            parse_decimal("not-a-number"),
            Err(VenueError::InvalidResponse(_))
        ));
    }

    #[test]
    fn url_joins_without_double_slash() {
        let v = venue();
        assert_eq!(
            v.url("v1/balances"),
            "https://api.north.example/v1/balances"
        );
    }
}

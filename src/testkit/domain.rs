//! Builders for domain values used across tests.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    Currency, NormalizedTick, Opportunity, OpportunityId, Tick, TickSource, VenueId,
};

/// A canonical-quote tick for `venue` at `price`, received `now`.
#[must_use]
pub fn tick(venue: &str, price: Decimal, now: DateTime<Utc>) -> Tick {
    Tick {
        venue: VenueId::new(venue),
        price,
        quote: Currency::new("USDT"),
        bid: Some(price - Decimal::new(1, 2)),
        ask: Some(price + Decimal::new(1, 2)),
        last_trade_ts: now,
        received_ts: now,
        volume_quote_24h: Some(Decimal::from(100_000)),
        source: TickSource::Stream,
    }
}

/// A normalized tick with explicit bid/ask.
#[must_use]
pub fn normalized_tick(
    venue: &str,
    bid: Decimal,
    ask: Decimal,
    now: DateTime<Utc>,
) -> NormalizedTick {
    NormalizedTick {
        venue: VenueId::new(venue),
        price: (bid + ask) / Decimal::TWO,
        bid: Some(bid),
        ask: Some(ask),
        last_trade_ts: now,
        received_ts: now,
        volume_quote_24h: Some(Decimal::from(100_000)),
        source: TickSource::Stream,
    }
}

/// A live opportunity: buy 100 base at `buy_price` on `buy`, sell at
/// `sell_price` on `sell`, expiring 5 seconds out.
#[must_use]
pub fn opportunity(
    buy: &str,
    sell: &str,
    buy_price: Decimal,
    sell_price: Decimal,
    base_amount: Decimal,
) -> Opportunity {
    let now = Utc::now();
    let spread_pct = (sell_price - buy_price) / buy_price;
    let notional = base_amount * buy_price;
    let est_gross = notional * spread_pct;
    let est_fees = notional * Decimal::new(4, 3);
    let est_slippage = notional * Decimal::new(3, 3);
    Opportunity {
        id: OpportunityId::new(),
        buy_venue: VenueId::new(buy),
        sell_venue: VenueId::new(sell),
        buy_price,
        sell_price,
        spread_pct,
        base_amount,
        notional_quote: notional,
        est_gross,
        est_fees,
        est_slippage,
        est_net: est_gross - est_fees - est_slippage,
        created_ts: now,
        expires_ts: now + Duration::seconds(5),
    }
}

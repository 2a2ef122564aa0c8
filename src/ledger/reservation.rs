//! Balance reservations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Currency, ReservationId, VenueId};

/// A hold on a `(venue, currency)` balance.
///
/// Reduces `available` without touching `total` until it is consumed,
/// released, or expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub venue: VenueId,
    pub currency: Currency,
    pub amount: Decimal,
    /// Client reference of the order this hold backs.
    pub order_ref: String,
    pub created_ts: DateTime<Utc>,
    pub expires_ts: DateTime<Utc>,
}

impl Reservation {
    /// Whether the hold is past its TTL at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn expiry_is_inclusive_at_deadline() {
        let now = Utc::now();
        let res = Reservation {
            id: ReservationId::new(),
            venue: VenueId::new("north"),
            currency: Currency::new("USDT"),
            amount: dec!(500),
            order_ref: "exec-1-buy".into(),
            created_ts: now,
            expires_ts: now + Duration::seconds(30),
        };
        assert!(!res.is_expired(now));
        assert!(!res.is_expired(now + Duration::seconds(29)));
        assert!(res.is_expired(now + Duration::seconds(30)));
    }
}

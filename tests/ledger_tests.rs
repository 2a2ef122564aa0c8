//! Ledger laws: reservation accounting, consume semantics, and the
//! available-balance invariant under concurrency.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spreadrunner::domain::{Currency, Side, VenueId};
use spreadrunner::ledger::{Ledger, RiskLimits};
use spreadrunner::service::{Event, EventBus};

fn ledger(events: &EventBus) -> Arc<Ledger> {
    Arc::new(Ledger::new(
        Currency::new("TON"),
        Currency::new("USDT"),
        RiskLimits::default(),
        events.clone(),
    ))
}

fn north() -> VenueId {
    VenueId::new("north")
}

fn usdt() -> Currency {
    Currency::new("USDT")
}

#[tokio::test]
async fn concurrent_reserves_never_oversubscribe() {
    let events = EventBus::new(256);
    let ledger = ledger(&events);
    ledger.update_balance(&north(), &usdt(), dec!(1000)).unwrap();

    // 10 tasks each try to hold 300 out of 1000: at most 3 can win.
    let mut handles = Vec::new();
    for i in 0..10 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            ledger
                .reserve(
                    &VenueId::new("north"),
                    &Currency::new("USDT"),
                    dec!(300),
                    &format!("exec-{i}-buy"),
                    Duration::from_secs(30),
                )
                .is_ok()
        }));
    }

    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 3);

    let snap = ledger.balance(&north(), &usdt());
    assert_eq!(snap.total, dec!(1000));
    assert_eq!(snap.available, dec!(100));
}

#[tokio::test]
async fn consume_is_a_single_balance_delta() {
    let events = EventBus::new(256);
    let ledger = ledger(&events);
    ledger.update_balance(&north(), &usdt(), dec!(1000)).unwrap();
    ledger
        .update_balance(&north(), &Currency::new("TON"), dec!(0))
        .unwrap();

    let before_quote = ledger.balance(&north(), &usdt()).total;
    let res = ledger
        .reserve(&north(), &usdt(), dec!(505), "exec-1-buy", Duration::from_secs(30))
        .unwrap();
    ledger.consume(&res.id, dec!(500), dec!(100), dec!(1)).unwrap();

    // Balance after equals balance before minus the consumed delta, and
    // the reservation is gone.
    assert_eq!(
        ledger.balance(&north(), &usdt()).total,
        before_quote - dec!(501)
    );
    assert!(!ledger.reservation_live(&res.id));
    assert!(ledger.consume(&res.id, dec!(1), dec!(1), dec!(0)).is_err());
}

#[tokio::test]
async fn expiry_emits_full_details() {
    let events = EventBus::new(256);
    let ledger = ledger(&events);
    let mut rx = events.subscribe();
    ledger.update_balance(&north(), &usdt(), dec!(1000)).unwrap();

    let res = ledger
        .reserve(&north(), &usdt(), dec!(250), "exec-9-buy", Duration::from_millis(10))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let expired = ledger.expire_due(chrono::Utc::now());
    assert_eq!(expired.len(), 1);

    let mut found = false;
    while let Ok(event) = rx.try_recv() {
        if let Event::ReserveTimeout {
            reservation_id,
            venue,
            currency,
            amount,
            ..
        } = event
        {
            assert_eq!(reservation_id, res.id);
            assert_eq!(venue, north());
            assert_eq!(currency, "USDT");
            assert_eq!(amount, dec!(250));
            found = true;
        }
    }
    assert!(found);
}

#[tokio::test]
async fn available_invariant_holds_through_a_trade_cycle() {
    let events = EventBus::new(256);
    let ledger = ledger(&events);
    ledger.update_balance(&north(), &usdt(), dec!(2000)).unwrap();

    // Invariant: available = max(0, total - sum(live reservations)), at
    // every step.
    let r1 = ledger
        .reserve(&north(), &usdt(), dec!(800), "a", Duration::from_secs(30))
        .unwrap();
    let r2 = ledger
        .reserve(&north(), &usdt(), dec!(700), "b", Duration::from_secs(30))
        .unwrap();
    assert_eq!(ledger.balance(&north(), &usdt()).available, dec!(500));

    ledger.release(&r1.id).unwrap();
    assert_eq!(ledger.balance(&north(), &usdt()).available, dec!(1300));

    ledger.consume(&r2.id, dec!(690), dec!(138), dec!(2)).unwrap();
    let snap = ledger.balance(&north(), &usdt());
    assert_eq!(snap.total, dec!(2000) - dec!(692));
    assert_eq!(snap.available, snap.total);
}

#[tokio::test]
async fn position_lifecycle_updates_daily_stats() {
    let events = EventBus::new(256);
    let ledger = ledger(&events);

    let pos = ledger.open_position(&north(), Side::Buy, dec!(40), dec!(5.00));
    assert_eq!(ledger.total_exposure(), dec!(200));

    let updated = ledger.update_position(pos.id, dec!(5.20)).unwrap();
    assert_eq!(updated.unrealized_pnl, dec!(8.00));

    let closed = ledger.close_position(pos.id, dec!(5.10)).unwrap();
    assert_eq!(closed.realized_pnl, dec!(4.00));
    assert_eq!(ledger.total_exposure(), Decimal::ZERO);

    let stats = ledger.daily_stats();
    assert_eq!(stats.trades, 1);
    assert_eq!(stats.realized_pnl, dec!(4.00));
}

//! Atomicity tests.
//!
//! A rejected or failed operation must leave no trace: no events, no
//! projection changes, no notifications.

use rust_decimal_macros::dec;
use session_ledger::events::PriceTickEvent;
use session_ledger::*;
use std::collections::BTreeMap;
use std::sync::Arc;

struct Fixture {
    store: Arc<InMemoryStore>,
    ledger: Ledger,
    session_id: SessionId,
}

/// AAPL/NVDA 100/60 split between alice and bob, over a store we can poke.
fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let ledger = Ledger::new(store.clone());
    let spec = SessionSpec::new("atomic", vec![Leg::from("AAPL"), Leg::from("NVDA")], vec![dec!(100), dec!(60)]);
    let session = ledger.create_session(spec).unwrap();
    ledger.join(&session.id, ParticipantId::from("alice"), None).unwrap();
    ledger.join(&session.id, ParticipantId::from("bob"), None).unwrap();
    ledger.assign_initial_allocations(&session.id, None).unwrap();
    Fixture {
        store,
        ledger,
        session_id: session.id,
    }
}

fn prices() -> BTreeMap<Leg, rust_decimal::Decimal> {
    let mut p = BTreeMap::new();
    p.insert(Leg::from("AAPL"), dec!(200));
    p.insert(Leg::from("NVDA"), dec!(500));
    p
}

mod storage_failure_tests {
    use super::*;

    #[test]
    fn failed_order_commit_leaves_no_trace() {
        let f = fixture();
        f.ledger
            .place_limit_order(&f.session_id, "alice".into(), "AAPL".into(), Side::Buy, dec!(5), Price::new_unchecked(dec!(100)))
            .unwrap();

        let events_before = f.store.event_count(&f.session_id);
        let allocations_before = f.ledger.allocations(&f.session_id).unwrap();
        let orders_before = f.ledger.orders(&f.session_id).unwrap();

        // this sell would cross and fill
        f.store.fail_next_commit();
        let err = f
            .ledger
            .place_limit_order(&f.session_id, "bob".into(), "AAPL".into(), Side::Sell, dec!(5), Price::new_unchecked(dec!(95)))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert_eq!(f.store.event_count(&f.session_id), events_before);
        assert_eq!(f.ledger.allocations(&f.session_id).unwrap(), allocations_before);
        assert_eq!(f.ledger.orders(&f.session_id).unwrap(), orders_before);
        assert!(f.ledger.trades(&f.session_id).unwrap().is_empty());
    }

    #[test]
    fn failure_is_one_shot() {
        let f = fixture();
        f.store.fail_next_commit();
        assert!(f.ledger.record_prices(&f.session_id, prices()).is_err());
        assert!(f.ledger.latest_prices(&f.session_id).unwrap().is_none());

        f.ledger.record_prices(&f.session_id, prices()).unwrap();
        assert!(f.ledger.latest_prices(&f.session_id).unwrap().is_some());
    }

    #[test]
    fn failed_accept_keeps_rfq_open() {
        let f = fixture();
        let rfq = f
            .ledger
            .create_rfq(&f.session_id, "alice".into(), "AAPL".into(), "NVDA".into(), dec!(10))
            .unwrap();
        let quote = f.ledger.provide_quote(&rfq.id, "bob".into(), dec!(0.62)).unwrap();
        let allocations_before = f.ledger.allocations(&f.session_id).unwrap();

        f.store.fail_next_commit();
        assert_eq!(f.ledger.accept_quote(&quote.id).unwrap_err().kind(), ErrorKind::Persistence);

        assert_eq!(f.ledger.rfq(&rfq.id).unwrap().status, RfqStatus::Open);
        assert_eq!(f.ledger.allocations(&f.session_id).unwrap(), allocations_before);

        // the same quote can still be accepted afterwards
        f.ledger.accept_quote(&quote.id).unwrap();
        assert_eq!(f.ledger.rfq(&rfq.id).unwrap().status, RfqStatus::Executed);
    }

    #[test]
    fn failed_commit_sends_no_notification() {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(BroadcastNotifier::new());
        let ledger = Ledger::new(store.clone()).with_notifier(notifier.clone());
        let session_id = SessionId::from("quiet");
        let mut rx = notifier.subscribe(&session_id);

        store.fail_next_commit();
        let spec = SessionSpec::new("quiet", vec![Leg::from("AAPL")], vec![dec!(1)]);
        assert!(ledger.create_session(spec).is_err());

        assert!(rx.try_recv().is_err());
        assert!(ledger.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn stale_sequence_is_rejected_by_the_store() {
        let f = fixture();
        let before = f.store.event_count(&f.session_id);

        let snapshot = PriceSnapshot::from_tick(
            &prices(),
            &[Leg::from("AAPL"), Leg::from("NVDA")],
            Timestamp::now(),
        )
        .unwrap();
        let stale = Commit::new(f.session_id.clone(), 0, Timestamp::now())
            .event(EventPayload::PriceTick(PriceTickEvent {
                snapshot: snapshot.clone(),
            }))
            .write(ProjectionWrite::PutPrices(snapshot));

        let err = f.store.commit(stale).unwrap_err();
        assert!(matches!(err, StoreError::SequenceConflict { expected: 0, .. }));
        assert_eq!(f.store.event_count(&f.session_id), before);
        assert!(f.store.latest_prices(&f.session_id).unwrap().is_none());
    }
}

mod rejection_tests {
    use super::*;

    #[test]
    fn settle_twice_keeps_first_result() {
        let f = fixture();
        f.ledger.record_prices(&f.session_id, prices()).unwrap();
        let first = f.ledger.settle(&f.session_id).unwrap();
        let events = f.store.event_count(&f.session_id);

        let err = f.ledger.settle(&f.session_id).unwrap_err();

        assert!(matches!(err, LedgerError::Session(SessionError::AlreadySettled(_))));
        assert_eq!(f.ledger.settlement(&f.session_id).unwrap(), Some(first));
        assert_eq!(f.store.event_count(&f.session_id), events);
    }

    #[test]
    fn settle_without_prices_changes_nothing() {
        let f = fixture();
        assert!(matches!(f.ledger.settle(&f.session_id), Err(LedgerError::NoPrices(_))));
        assert_eq!(f.ledger.session(&f.session_id).unwrap().status, SessionStatus::Active);
        assert!(f.ledger.settlement(&f.session_id).unwrap().is_none());
    }

    #[test]
    fn settle_without_allocations_is_rejected() {
        let ledger = Ledger::in_memory();
        let spec = SessionSpec::new("bare", vec![Leg::from("AAPL"), Leg::from("NVDA")], vec![dec!(1), dec!(1)]);
        let session = ledger.create_session(spec).unwrap();
        ledger.record_prices(&session.id, prices()).unwrap();

        assert!(matches!(ledger.settle(&session.id), Err(LedgerError::NoAllocations(_))));
    }

    #[test]
    fn infeasible_accept_changes_nothing() {
        let f = fixture();
        // bob holds 30 NVDA; 50 AAPL at 0.7 asks him for 35
        let rfq = f
            .ledger
            .create_rfq(&f.session_id, "alice".into(), "AAPL".into(), "NVDA".into(), dec!(50))
            .unwrap();
        let quote = f.ledger.provide_quote(&rfq.id, "bob".into(), dec!(0.7)).unwrap();
        let allocations_before = f.ledger.allocations(&f.session_id).unwrap();
        let events_before = f.store.event_count(&f.session_id);

        let err = f.ledger.accept_quote(&quote.id).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Invariant);
        assert!(matches!(
            err,
            LedgerError::Invariant(InvariantViolation::InsufficientHoldings { .. })
        ));
        assert_eq!(f.ledger.allocations(&f.session_id).unwrap(), allocations_before);
        assert_eq!(f.store.event_count(&f.session_id), events_before);
        assert_eq!(f.ledger.rfq(&rfq.id).unwrap().status, RfqStatus::Open);
    }

    #[test]
    fn requester_short_of_leg_from_is_rejected() {
        let f = fixture();
        let rfq = f
            .ledger
            .create_rfq(&f.session_id, "alice".into(), "NVDA".into(), "AAPL".into(), dec!(31))
            .unwrap();
        let quote = f.ledger.provide_quote(&rfq.id, "bob".into(), dec!(0.1)).unwrap();

        assert_eq!(f.ledger.accept_quote(&quote.id).unwrap_err().kind(), ErrorKind::Invariant);
        assert!(f.ledger.trades(&f.session_id).unwrap().is_empty());
    }

    #[test]
    fn oversized_sell_is_rejected_before_resting() {
        let f = fixture();
        let events_before = f.store.event_count(&f.session_id);

        let err = f
            .ledger
            .place_limit_order(&f.session_id, "alice".into(), "AAPL".into(), Side::Sell, dec!(51), Price::new_unchecked(dec!(10)))
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::Order(OrderError::InsufficientHoldings { .. })
        ));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(f.ledger.orders(&f.session_id).unwrap().is_empty());
        assert_eq!(f.store.event_count(&f.session_id), events_before);
    }

    #[test]
    fn stale_resting_sell_is_rejected_and_matching_continues() {
        let f = fixture();
        // alice rests a sell for all her AAPL, then swaps most of it away
        let stale = f
            .ledger
            .place_limit_order(&f.session_id, "alice".into(), "AAPL".into(), Side::Sell, dec!(50), Price::new_unchecked(dec!(100)))
            .unwrap()
            .order;
        let rfq = f
            .ledger
            .create_rfq(&f.session_id, "alice".into(), "AAPL".into(), "NVDA".into(), dec!(40))
            .unwrap();
        let quote = f.ledger.provide_quote(&rfq.id, "bob".into(), dec!(0.5)).unwrap();
        f.ledger.accept_quote(&quote.id).unwrap();
        // what she has left is covered and priced just behind
        f.ledger
            .place_limit_order(&f.session_id, "alice".into(), "AAPL".into(), Side::Sell, dec!(10), Price::new_unchecked(dec!(101)))
            .unwrap();

        let result = f
            .ledger
            .place_limit_order(&f.session_id, "bob".into(), "AAPL".into(), Side::Buy, dec!(50), Price::new_unchecked(dec!(101)))
            .unwrap();

        assert_eq!(result.order.status, OrderStatus::Partial);
        assert_eq!(result.filled_quantity(), dec!(10));
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].amount_from, dec!(1010));
        assert_eq!(f.ledger.order(&stale.id).unwrap().status, OrderStatus::Rejected);

        let allocations = f.ledger.allocations(&f.session_id).unwrap();
        assert_eq!(allocations[&ParticipantId::from("alice")][&Leg::from("AAPL")], dec!(0));
        assert_eq!(allocations[&ParticipantId::from("bob")][&Leg::from("AAPL")], dec!(100));

        let rejections = f
            .ledger
            .events(&f.session_id, 0)
            .unwrap()
            .iter()
            .filter(|e| e.event_type() == EventType::OrderRejected)
            .count();
        assert_eq!(rejections, 1);

        let state = f.ledger.replay(&f.session_id).unwrap();
        assert_eq!(state.orders[&stale.id].status, OrderStatus::Rejected);
        assert_eq!(state.allocations, allocations);
    }

    #[test]
    fn invalid_order_shapes_are_rejected() {
        let f = fixture();

        let zero = f
            .ledger
            .place_market_order(&f.session_id, "alice".into(), "AAPL".into(), Side::Buy, dec!(0))
            .unwrap_err();
        assert!(matches!(zero, LedgerError::Order(OrderError::NonPositiveQuantity(_))));

        let mut priced_market = OrderRequest::market("alice", "AAPL", Side::Buy, dec!(1));
        priced_market.price = Some(Price::new_unchecked(dec!(1)));
        let err = f.ledger.place_order(&f.session_id, priced_market).unwrap_err();
        assert!(matches!(err, LedgerError::Order(OrderError::PriceOnMarketOrder)));

        let mut bare_limit = OrderRequest::limit("alice", "AAPL", Side::Buy, dec!(1), Price::new_unchecked(dec!(1)));
        bare_limit.price = None;
        let err = f.ledger.place_order(&f.session_id, bare_limit).unwrap_err();
        assert!(matches!(err, LedgerError::Order(OrderError::MissingLimitPrice)));

        assert!(f.ledger.orders(&f.session_id).unwrap().is_empty());
    }
}

mod overflow_tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn fill_notional_out_of_range_changes_nothing() {
        let f = fixture();
        let top = Price::new(Decimal::MAX).unwrap();
        f.ledger
            .place_limit_order(&f.session_id, "alice".into(), "AAPL".into(), Side::Sell, dec!(10), top)
            .unwrap();
        let events_before = f.store.event_count(&f.session_id);
        let allocations_before = f.ledger.allocations(&f.session_id).unwrap();

        let err = f
            .ledger
            .place_market_order(&f.session_id, "bob".into(), "AAPL".into(), Side::Buy, dec!(2))
            .unwrap_err();

        assert!(matches!(err, LedgerError::Overflow(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(f.store.event_count(&f.session_id), events_before);
        assert_eq!(f.ledger.allocations(&f.session_id).unwrap(), allocations_before);
        assert_eq!(f.ledger.orders(&f.session_id).unwrap().len(), 1);
        assert!(f.ledger.trades(&f.session_id).unwrap().is_empty());
    }

    #[test]
    fn quote_amount_out_of_range_keeps_rfq_open() {
        let f = fixture();
        let rfq = f
            .ledger
            .create_rfq(&f.session_id, "alice".into(), "AAPL".into(), "NVDA".into(), dec!(10))
            .unwrap();
        let quote = f.ledger.provide_quote(&rfq.id, "bob".into(), Decimal::MAX).unwrap();
        let events_before = f.store.event_count(&f.session_id);

        let err = f.ledger.accept_quote(&quote.id).unwrap_err();

        assert!(matches!(err, LedgerError::Overflow(_)));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(f.ledger.rfq(&rfq.id).unwrap().status, RfqStatus::Open);
        assert_eq!(f.store.event_count(&f.session_id), events_before);
    }

    #[test]
    fn settlement_value_out_of_range_keeps_session_active() {
        let f = fixture();
        let mut huge = prices();
        huge.insert(Leg::from("AAPL"), Decimal::MAX);
        f.ledger.record_prices(&f.session_id, huge).unwrap();

        let err = f.ledger.settle(&f.session_id).unwrap_err();

        assert!(matches!(err, LedgerError::Invariant(InvariantViolation::Overflow(_))));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(f.ledger.session(&f.session_id).unwrap().status, SessionStatus::Active);
        assert!(f.ledger.settlement(&f.session_id).unwrap().is_none());
    }
}

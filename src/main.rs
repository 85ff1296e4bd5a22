//! Session Ledger Simulation.
//!
//! Runs the reference scenarios end to end: pro-rata allocation and
//! settlement, a bilateral RFQ trade, a crossing limit order pair, and a
//! burst of concurrent orders against one session.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use session_ledger::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), LedgerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    println!("Session Ledger Simulation");
    println!("Two legs, two participants, three mutation paths\n");

    scenario_a_pro_rata_settlement()?;
    scenario_b_bilateral_trade()?;
    scenario_c_order_matching()?;
    scenario_d_concurrent_orders()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn legs() -> Vec<Leg> {
    vec![Leg::from("AAPL"), Leg::from("NVDA")]
}

/// AAPL/NVDA basket of 100/60 shared by alice and bob.
fn setup(ledger: &Ledger, name: &str) -> Result<SessionId, LedgerError> {
    let spec = SessionSpec::new(name, legs(), vec![dec!(100), dec!(60)]);
    let session = ledger.create_session(spec)?;

    ledger.join(&session.id, ParticipantId::from("alice"), Some("Alice".to_string()))?;
    ledger.join(&session.id, ParticipantId::from("bob"), Some("Bob".to_string()))?;
    ledger.assign_initial_allocations(&session.id, None)?;

    Ok(session.id)
}

fn print_allocations(ledger: &Ledger, session_id: &SessionId) -> Result<(), LedgerError> {
    for (participant, holdings) in ledger.allocations(session_id)? {
        let row: Vec<String> = holdings.iter().map(|(leg, qty)| format!("{leg}: {}", qty.normalize())).collect();
        println!("  {participant}: {{{}}}", row.join(", "));
    }
    Ok(())
}

fn prices(aapl: Decimal, nvda: Decimal) -> BTreeMap<Leg, Decimal> {
    let mut prices = BTreeMap::new();
    prices.insert(Leg::from("AAPL"), aapl);
    prices.insert(Leg::from("NVDA"), nvda);
    prices
}

/// Pro-rata split, then settlement at fixed prices.
fn scenario_a_pro_rata_settlement() -> Result<(), LedgerError> {
    println!("Scenario A: Pro-Rata Allocation and Settlement\n");

    let ledger = Ledger::in_memory();
    let session_id = setup(&ledger, "scenario-a")?;

    println!("  Basket AAPL 100, NVDA 60 split across alice and bob");
    print_allocations(&ledger, &session_id)?;

    ledger.record_prices(&session_id, prices(dec!(200), dec!(500)))?;
    let settlement = ledger.settle(&session_id)?;

    println!("\n  Settled at AAPL $200, NVDA $500");
    for (participant, payout) in &settlement.payouts {
        println!("  {participant}: ${}", payout.normalize());
    }
    println!("  Total: ${}\n", settlement.total_payout().normalize());

    Ok(())
}

/// alice gives 10 AAPL for NVDA at bob's rate of 0.62.
fn scenario_b_bilateral_trade() -> Result<(), LedgerError> {
    println!("Scenario B: RFQ and Quote\n");

    let ledger = Ledger::in_memory();
    let session_id = setup(&ledger, "scenario-b")?;

    let rfq = ledger.create_rfq(
        &session_id,
        ParticipantId::from("alice"),
        Leg::from("AAPL"),
        Leg::from("NVDA"),
        dec!(10),
    )?;
    println!("  alice requests NVDA for 10 AAPL");

    let quote = ledger.provide_quote(&rfq.id, ParticipantId::from("bob"), dec!(0.62))?;
    println!("  bob quotes rate {}", quote.rate);

    let trade = ledger.accept_quote(&quote.id)?;
    println!("  accepted: {} {} for {} {}\n", trade.amount_from, trade.leg_from, trade.amount_to, trade.leg_to);

    print_allocations(&ledger, &session_id)?;

    let replayed = ledger.replay(&session_id)?;
    println!(
        "\n  Replay of {} events matches live projection: {}\n",
        replayed.last_sequence.map_or(0, |s| s + 1),
        replayed.allocations == ledger.allocations(&session_id)?
    );

    Ok(())
}

/// Crossing limits trade at the sell price.
fn scenario_c_order_matching() -> Result<(), LedgerError> {
    println!("Scenario C: Limit Order Matching\n");

    let ledger = Ledger::in_memory();
    let session_id = setup(&ledger, "scenario-c")?;

    let buy = ledger.place_limit_order(
        &session_id,
        ParticipantId::from("alice"),
        Leg::from("AAPL"),
        Side::Buy,
        dec!(5),
        Price::new_unchecked(dec!(100)),
    )?;
    println!("  alice BUY 5 AAPL @ $100, status {:?}", buy.order.status);

    let sell = ledger.place_limit_order(
        &session_id,
        ParticipantId::from("bob"),
        Leg::from("AAPL"),
        Side::Sell,
        dec!(5),
        Price::new_unchecked(dec!(95)),
    )?;
    println!("  bob SELL 5 AAPL @ $95, status {:?}", sell.order.status);

    if let Some(price) = sell.average_price() {
        println!("  Filled {} @ ${}\n", sell.filled_quantity(), price);
    }

    let buy_after = ledger.order(&buy.order.id)?;
    println!("  alice's order now {:?}", buy_after.status);
    print_allocations(&ledger, &session_id)?;
    println!();

    Ok(())
}

/// Many threads trading one session. Conservation must still hold.
fn scenario_d_concurrent_orders() -> Result<(), LedgerError> {
    println!("Scenario D: Concurrent Orders\n");

    let notifier = Arc::new(BroadcastNotifier::new());
    let ledger = Arc::new(Ledger::in_memory().with_notifier(notifier.clone()));
    let session_id = setup(&ledger, "scenario-d")?;
    let mut updates = notifier.subscribe(&session_id);

    let handles: Vec<_> = (0..8u32)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            let session_id = session_id.clone();
            thread::spawn(move || {
                let (who, side, price) = if i % 2 == 0 {
                    ("alice", Side::Sell, dec!(99))
                } else {
                    ("bob", Side::Buy, dec!(101))
                };
                ledger.place_limit_order(
                    &session_id,
                    ParticipantId::from(who),
                    Leg::from("NVDA"),
                    side,
                    dec!(2),
                    Price::new_unchecked(price),
                )
            })
        })
        .collect();

    let mut fills = 0;
    for handle in handles {
        match handle.join() {
            Ok(result) => fills += result?.trades.len(),
            Err(_) => info!("order thread panicked"),
        }
    }

    let allocations = ledger.allocations(&session_id)?;
    let nvda: Decimal = allocations
        .values()
        .map(|h| h.get(&Leg::from("NVDA")).copied().unwrap_or_default())
        .sum();

    let mut delivered = 0;
    while updates.try_recv().is_ok() {
        delivered += 1;
    }

    println!("  8 orders from 8 threads, {fills} fills");
    println!("  NVDA still sums to {} across participants", nvda.normalize());
    println!("  {delivered} notifications delivered");
    print_allocations(&ledger, &session_id)?;

    Ok(())
}

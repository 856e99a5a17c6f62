//! Background monitor behavior: SL/TP triggers and priority, funding
//! settlement idempotence, and liquidation sweeps.

use chrono::Duration as ChronoDuration;
use paper_perps::*;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn btc() -> Symbol {
    Symbol::from("BTCUSDT")
}

fn shared_engine(balance: rust_decimal::Decimal, btc_price: rust_decimal::Decimal) -> (Arc<MockPriceFeed>, SharedEngine) {
    let feed = Arc::new(MockPriceFeed::with_default_markets());
    feed.set_price(btc(), btc_price);
    let engine = Arc::new(Mutex::new(PaperEngine::new(balance, feed.clone())));
    (feed, engine)
}

fn open_long(engine: &SharedEngine, sl: Option<rust_decimal::Decimal>, tp: Option<rust_decimal::Decimal>) -> PositionId {
    let order = engine
        .lock()
        .unwrap()
        .create_market_order(btc(), Side::Long, dec!(0.1), Leverage::new(10).unwrap(), sl, tp, false)
        .unwrap();
    order.position_id.unwrap()
}

#[test]
fn stoploss_triggers_on_drawdown() {
    let (feed, engine) = shared_engine(dec!(10000), dec!(95000));
    let position_id = open_long(&engine, Some(dec!(90000)), None);
    let monitor = SltpMonitor::new(engine.clone());

    // above the stop: nothing happens
    feed.set_price(btc(), dec!(91000));
    let report = monitor.run_check_now();
    assert_eq!(report.sl_triggered, 0);

    feed.set_price(btc(), dec!(89500));
    let report = monitor.run_check_now();
    assert_eq!(report.sl_triggered, 1);
    assert_eq!(monitor.sl_triggered_count(), 1);

    let position = engine.lock().unwrap().get_position_history(10)[0].clone();
    assert_eq!(position.position_id, position_id);
    assert_eq!(position.close_reason, Some(CloseReason::Stoploss));
    assert_eq!(position.exit_price, Some(dec!(89500)));
}

#[test]
fn takeprofit_triggers_on_rally() {
    let (feed, engine) = shared_engine(dec!(10000), dec!(95000));
    open_long(&engine, None, Some(dec!(100000)));
    let monitor = SltpMonitor::new(engine.clone());

    feed.set_price(btc(), dec!(100500));
    let report = monitor.run_check_now();
    assert_eq!(report.tp_triggered, 1);

    let history = engine.lock().unwrap().get_position_history(10);
    assert_eq!(history[0].close_reason, Some(CloseReason::Takeprofit));
}

#[test]
fn short_side_triggers_are_mirrored() {
    let (feed, engine) = shared_engine(dec!(10000), dec!(95000));
    engine
        .lock()
        .unwrap()
        .create_market_order(
            btc(),
            Side::Short,
            dec!(0.1),
            Leverage::new(10).unwrap(),
            Some(dec!(100000)), // SL above for a short
            Some(dec!(90000)),  // TP below
            false,
        )
        .unwrap();
    let monitor = SltpMonitor::new(engine.clone());

    feed.set_price(btc(), dec!(89000));
    let report = monitor.run_check_now();
    assert_eq!(report.tp_triggered, 1);
    assert_eq!(report.sl_triggered, 0);
}

#[test]
fn takeprofit_wins_when_both_conditions_hold() {
    // a long with TP below the price and SL above it: both conditions are
    // numerically true in the same tick, profit-taking must win
    let (feed, engine) = shared_engine(dec!(10000), dec!(95000));
    open_long(&engine, Some(dec!(120000)), Some(dec!(100000)));
    let monitor = SltpMonitor::new(engine.clone());

    feed.set_price(btc(), dec!(110000));
    let report = monitor.run_check_now();
    assert_eq!(report.tp_triggered, 1);
    assert_eq!(report.sl_triggered, 0);

    let history = engine.lock().unwrap().get_position_history(10);
    assert_eq!(history[0].close_reason, Some(CloseReason::Takeprofit));
}

#[test]
fn monitor_tick_fills_pending_limit_orders() {
    let (feed, engine) = shared_engine(dec!(10000), dec!(95000));
    engine
        .lock()
        .unwrap()
        .create_limit_order(
            btc(),
            Side::Long,
            dec!(0.1),
            dec!(90000),
            Leverage::new(10).unwrap(),
            None,
            None,
            false,
        )
        .unwrap();
    let monitor = SltpMonitor::new(engine.clone());

    feed.set_price(btc(), dec!(89000));
    let report = monitor.run_check_now();
    assert_eq!(report.limit_orders_filled, 1);
    assert_eq!(engine.lock().unwrap().list_open_positions().len(), 1);
}

#[test]
fn liquidation_warning_callback_fires_in_band() {
    let (feed, engine) = shared_engine(dec!(10000), dec!(95000));
    open_long(&engine, None, None);

    let warnings = Arc::new(AtomicUsize::new(0));
    let counter = warnings.clone();
    let monitor = SltpMonitor::new(engine.clone()).with_hooks(
        None,
        None,
        Some(Arc::new(move |_pos, _price, _liq| {
            counter.fetch_add(1, Ordering::SeqCst);
        })),
    );

    // liq estimate = 95000 * (1 - 0.1 + 0.005) = 85975; within 10% at 90000
    feed.set_price(btc(), dec!(90000));
    monitor.run_check_now();
    assert_eq!(warnings.load(Ordering::SeqCst), 1);

    // far from liquidation: no warning
    feed.set_price(btc(), dec!(110000));
    monitor.run_check_now();
    assert_eq!(warnings.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sltp_monitor_lifecycle() {
    let (feed, engine) = shared_engine(dec!(10000), dec!(95000));
    open_long(&engine, None, Some(dec!(100000)));

    let mut monitor = SltpMonitor::with_interval(engine.clone(), Duration::from_millis(10));
    assert!(!monitor.is_running());
    monitor.start();
    assert!(monitor.is_running());

    feed.set_price(btc(), dec!(101000));
    tokio::time::sleep(Duration::from_millis(100)).await;

    monitor.stop().await;
    assert!(!monitor.is_running());
    assert!(monitor.tp_triggered_count() >= 1);
    assert!(engine.lock().unwrap().list_open_positions().is_empty());
}

// ---------------------------------------------------------------------------
// funding
// ---------------------------------------------------------------------------

#[test]
fn funding_settles_once_per_boundary() {
    let (_feed, engine) = shared_engine(dec!(10000), dec!(100000));
    open_long(&engine, None, None);

    let rates = Arc::new(MockFundingRateSource::new());
    rates.set_rate(btc(), dec!(0.0001));
    let monitor = FundingMonitor::new(engine.clone(), rates);

    let opened_at = engine.lock().unwrap().list_open_positions()[0].opened_at;
    let boundary = funding_times_between(opened_at, opened_at + ChronoDuration::hours(8))
        .into_iter()
        .next()
        .unwrap();

    let balance_before = engine.lock().unwrap().wallet().balance;
    let first = monitor.process_funding_at(boundary);
    assert_eq!(first.len(), 1);
    // LONG pays at a positive rate: 0.1 * 100000 * 0.0001 = 1
    assert_eq!(first[0].payment_amount, dec!(-1.00000));
    assert_eq!(engine.lock().unwrap().wallet().balance, balance_before - dec!(1));

    // same boundary polled again: exactly-once settlement holds
    let second = monitor.process_funding_at(boundary);
    assert!(second.is_empty());
    assert_eq!(engine.lock().unwrap().wallet().balance, balance_before - dec!(1));
    assert_eq!(monitor.stats().payment_count, 1);
}

#[test]
fn funding_settles_every_elapsed_boundary() {
    let (_feed, engine) = shared_engine(dec!(10000), dec!(100000));
    open_long(&engine, None, None);

    let rates = Arc::new(MockFundingRateSource::new());
    rates.set_rate(btc(), dec!(-0.0001)); // negative rate: long receives
    let monitor = FundingMonitor::new(engine.clone(), rates);

    let opened_at = engine.lock().unwrap().list_open_positions()[0].opened_at;
    let payments = monitor.process_funding_at(opened_at + ChronoDuration::hours(24));

    assert_eq!(payments.len(), 3);
    assert!(payments.iter().all(|p| p.payment_amount == dec!(1.00000)));
    assert_eq!(monitor.total_funding(), dec!(3.00000));
}

#[test]
fn funding_state_round_trip() {
    let (_feed, engine) = shared_engine(dec!(10000), dec!(100000));
    open_long(&engine, None, None);

    let rates = Arc::new(MockFundingRateSource::new());
    let monitor = FundingMonitor::new(engine.clone(), rates.clone());
    let opened_at = engine.lock().unwrap().list_open_positions()[0].opened_at;
    monitor.process_funding_at(opened_at + ChronoDuration::hours(8));

    let state = monitor.to_state();
    assert_eq!(state.payments.len(), 1);

    let restored = FundingMonitor::new(engine.clone(), rates);
    restored.restore_state(state);
    assert_eq!(restored.stats().payment_count, 1);

    // restored last-settled markers still dedupe the boundary
    let replay = restored.process_funding_at(opened_at + ChronoDuration::hours(8));
    assert!(replay.is_empty());
}

#[tokio::test]
async fn funding_monitor_lifecycle() {
    let (_feed, engine) = shared_engine(dec!(10000), dec!(100000));
    let rates = Arc::new(MockFundingRateSource::new());
    let mut monitor = FundingMonitor::with_interval(engine, rates, Duration::from_millis(10));

    monitor.start();
    assert!(monitor.is_running());
    tokio::time::sleep(Duration::from_millis(50)).await;
    monitor.stop().await;
    assert!(!monitor.is_running());
}

// ---------------------------------------------------------------------------
// liquidation
// ---------------------------------------------------------------------------

#[test]
fn liquidation_fires_when_maintenance_breached() {
    let (feed, engine) = shared_engine(dec!(10000), dec!(50000));
    engine
        .lock()
        .unwrap()
        .create_market_order(btc(), Side::Long, dec!(1), Leverage::new(10).unwrap(), None, None, false)
        .unwrap();

    let liq = LiquidationEngine::new(engine.clone());

    // margin balance 5000 - 4700 = 300, MM 250: at risk but alive
    feed.set_price(btc(), dec!(45300));
    assert!(liq.check_now().is_empty());
    assert_eq!(liq.at_risk_positions().len(), 1);

    // margin balance 200 <= MM 250: liquidate at the mark
    feed.set_price(btc(), dec!(45200));
    let events = liq.check_now();
    assert_eq!(events.len(), 1);
    // fee = 45200 * 0.005
    assert_eq!(events[0].liquidation_fee, dec!(226.000));

    let guard = engine.lock().unwrap();
    let history = guard.get_position_history(10);
    let closed = &history[0];
    assert_eq!(closed.close_reason, Some(CloseReason::Liquidation));
    assert_eq!(closed.exit_price, Some(dec!(45200)));
    assert_eq!(guard.wallet().locked_margin, dec!(0));
    // 10000 - 25 open fee - 4800 loss - 226 liquidation fee
    assert_eq!(guard.wallet().balance, dec!(4949.000));
}

#[test]
fn margin_warning_fires_once_until_recovery() {
    let (feed, engine) = shared_engine(dec!(10000), dec!(50000));
    engine
        .lock()
        .unwrap()
        .create_market_order(btc(), Side::Long, dec!(1), Leverage::new(10).unwrap(), None, None, false)
        .unwrap();

    let warnings = Arc::new(AtomicUsize::new(0));
    let counter = warnings.clone();
    let liq = LiquidationEngine::new(engine.clone()).with_hooks(
        None,
        Some(Arc::new(move |_status| {
            counter.fetch_add(1, Ordering::SeqCst);
        })),
    );

    feed.set_price(btc(), dec!(45300));
    liq.check_now();
    liq.check_now();
    assert_eq!(warnings.load(Ordering::SeqCst), 1); // deduped while at risk

    // recovery re-arms the warning
    feed.set_price(btc(), dec!(50000));
    liq.check_now();
    feed.set_price(btc(), dec!(45300));
    liq.check_now();
    assert_eq!(warnings.load(Ordering::SeqCst), 2);
}

#[test]
fn liquidation_hook_receives_event() {
    let (feed, engine) = shared_engine(dec!(10000), dec!(50000));
    engine
        .lock()
        .unwrap()
        .create_market_order(btc(), Side::Long, dec!(1), Leverage::new(10).unwrap(), None, None, false)
        .unwrap();

    let liquidated = Arc::new(AtomicUsize::new(0));
    let counter = liquidated.clone();
    let liq = LiquidationEngine::new(engine.clone()).with_hooks(
        Some(Arc::new(move |event| {
            assert_eq!(event.side, Side::Long);
            counter.fetch_add(1, Ordering::SeqCst);
        })),
        None,
    );

    feed.set_price(btc(), dec!(44000));
    liq.check_now();
    assert_eq!(liquidated.load(Ordering::SeqCst), 1);
    assert_eq!(liq.liquidations().len(), 1);
}

#[tokio::test]
async fn liquidation_engine_lifecycle() {
    let (feed, engine) = shared_engine(dec!(10000), dec!(50000));
    engine
        .lock()
        .unwrap()
        .create_market_order(btc(), Side::Long, dec!(1), Leverage::new(20).unwrap(), None, None, false)
        .unwrap();

    let mut liq = LiquidationEngine::with_params(
        engine.clone(),
        LiquidationParams::default(),
        Duration::from_millis(10),
    );
    liq.start();

    feed.set_price(btc(), dec!(47000)); // 20x long is gone well before -6%
    tokio::time::sleep(Duration::from_millis(100)).await;
    liq.stop().await;

    assert_eq!(liq.liquidations().len(), 1);
    assert!(engine.lock().unwrap().list_open_positions().is_empty());
}

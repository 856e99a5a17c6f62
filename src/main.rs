//! Paper Trading Simulation.
//!
//! Demonstrates the full engine lifecycle against the mock price feed:
//! netting, limit fills, SL/TP triggers, funding settlement, and liquidation.

use paper_perps::*;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paper_perps=info".into()),
        )
        .init();

    println!("Paper Perpetual Futures Simulation");
    println!("One Wallet, Isolated Margin, Full Lifecycle\n");

    scenario_1_open_and_close();
    scenario_2_netting_and_flip();
    scenario_3_limit_orders();
    scenario_4_sltp_and_liquidation().await;
    scenario_5_funding();

    println!("\nAll simulations completed.");
}

/// Open a leveraged long, watch PnL, close at a profit.
fn scenario_1_open_and_close() {
    println!("Scenario 1: Open and Close\n");

    let feed = Arc::new(MockPriceFeed::with_default_markets());
    feed.set_price(Symbol::from("BTCUSDT"), dec!(95000));
    let mut engine = PaperEngine::new(dec!(10000), feed.clone());

    let order = engine
        .create_market_order(
            Symbol::from("BTCUSDT"),
            Side::Long,
            dec!(0.1),
            Leverage::new(10).unwrap(),
            None,
            None,
            false,
        )
        .unwrap();
    println!("  Opened LONG 0.1 BTC @ $95,000 (fee ${})", order.fee_paid);
    println!("  Available after open: ${}", engine.wallet().available);

    feed.set_price(Symbol::from("BTCUSDT"), dec!(100000));
    let positions = engine.list_open_positions();
    println!("  Price to $100,000, unrealized PnL: ${}", positions[0].unrealized_pnl);

    let position_id = positions[0].position_id.clone();
    let closed = engine.close_position(&position_id, None).unwrap();
    println!("  Closed @ ${}, realized ${}", closed.exit_price.unwrap(), closed.realized_pnl);
    println!("  Balance: ${}\n", engine.wallet().balance);
}

/// Same-side averaging, opposite-side netting, and a flip.
fn scenario_2_netting_and_flip() {
    println!("Scenario 2: Netting and Flip\n");

    let feed = Arc::new(MockPriceFeed::with_default_markets());
    feed.set_price(Symbol::from("ETHUSDT"), dec!(3000));
    let mut engine = PaperEngine::new(dec!(20000), feed.clone());
    let eth = Symbol::from("ETHUSDT");
    let lev = Leverage::new(5).unwrap();

    engine
        .create_market_order(eth.clone(), Side::Long, dec!(1), lev, None, None, false)
        .unwrap();
    feed.set_price(eth.clone(), dec!(3200));
    engine
        .create_market_order(eth.clone(), Side::Long, dec!(1), lev, None, None, false)
        .unwrap();
    let positions = engine.list_open_positions();
    println!("  Averaged in: {} ETH @ ${}", positions[0].quantity, positions[0].entry_price);

    // opposite order larger than the position: close 2, open 1 short
    engine
        .create_market_order(eth.clone(), Side::Short, dec!(3), lev, None, None, false)
        .unwrap();
    let positions = engine.list_open_positions();
    println!(
        "  After 3 ETH short: {} {} ETH @ ${}",
        positions[0].side, positions[0].quantity, positions[0].entry_price
    );

    let stats = engine.get_statistics();
    println!(
        "  Realized ${}, fees ${}, win rate {}\n",
        stats.realized_pnl,
        stats.total_fees_paid,
        stats.win_rate_display()
    );
}

/// Limit order placement, non-fill, then fill on a dip.
fn scenario_3_limit_orders() {
    println!("Scenario 3: Limit Orders\n");

    let feed = Arc::new(MockPriceFeed::with_default_markets());
    feed.set_price(Symbol::from("XRPUSDT"), dec!(2.50));
    let mut engine = PaperEngine::new(dec!(5000), feed.clone());
    let xrp = Symbol::from("XRPUSDT");

    let order = engine
        .create_limit_order(
            xrp.clone(),
            Side::Long,
            dec!(100),
            dec!(2.00),
            Leverage::new(5).unwrap(),
            None,
            None,
            false,
        )
        .unwrap();
    println!("  Buy limit 100 XRP @ $2.00 placed, status {:?}", order.status);

    let filled = engine.check_limit_orders();
    println!("  Price $2.50: {} fills", filled.len());

    feed.set_price(xrp.clone(), dec!(1.98));
    let filled = engine.check_limit_orders();
    println!(
        "  Price $1.98: filled {} @ ${} (limit price, not market)\n",
        filled.len(),
        filled[0].filled_price.unwrap()
    );
}

/// Background monitors: a take-profit trigger and a liquidation.
async fn scenario_4_sltp_and_liquidation() {
    println!("Scenario 4: SL/TP and Liquidation Monitors\n");

    let feed = Arc::new(MockPriceFeed::with_default_markets());
    feed.set_price(Symbol::from("SOLUSDT"), dec!(200));
    let engine = Arc::new(Mutex::new(PaperEngine::new(dec!(10000), feed.clone())));
    let sol = Symbol::from("SOLUSDT");

    engine
        .lock()
        .unwrap()
        .create_market_order(
            sol.clone(),
            Side::Long,
            dec!(10),
            Leverage::new(10).unwrap(),
            Some(dec!(190)),
            Some(dec!(220)),
            false,
        )
        .unwrap();
    println!("  LONG 10 SOL @ $200, SL $190 / TP $220");

    let mut monitor = SltpMonitor::with_interval(engine.clone(), Duration::from_millis(50));
    let mut liq = LiquidationEngine::with_params(
        engine.clone(),
        LiquidationParams::default(),
        Duration::from_millis(50),
    );
    monitor.start();
    liq.start();

    feed.set_price(sol.clone(), dec!(221));
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!(
        "  Price $221 -> TP fired {} time(s), balance ${}",
        monitor.tp_triggered_count(),
        engine.lock().unwrap().wallet().balance
    );

    // a fresh high-leverage position that the crash will liquidate
    feed.set_price(sol.clone(), dec!(200));
    engine
        .lock()
        .unwrap()
        .create_market_order(
            sol.clone(),
            Side::Long,
            dec!(10),
            Leverage::new(20).unwrap(),
            None,
            None,
            false,
        )
        .unwrap();
    feed.set_price(sol.clone(), dec!(188));
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("  Crash to $188 -> {} liquidation(s)", liq.liquidations().len());

    monitor.stop().await;
    liq.stop().await;
    println!();
}

/// Funding settlement across an elapsed 8-hour boundary.
fn scenario_5_funding() {
    println!("Scenario 5: Funding Settlement\n");

    let feed = Arc::new(MockPriceFeed::with_default_markets());
    let engine = Arc::new(Mutex::new(PaperEngine::new(dec!(10000), feed.clone())));
    let rates = Arc::new(MockFundingRateSource::new());
    rates.set_rate(Symbol::from("BTCUSDT"), dec!(0.0001));

    engine
        .lock()
        .unwrap()
        .create_market_order(
            Symbol::from("BTCUSDT"),
            Side::Long,
            dec!(0.1),
            Leverage::new(10).unwrap(),
            None,
            None,
            false,
        )
        .unwrap();

    let monitor = FundingMonitor::new(engine.clone(), rates);
    let next_boundary = funding_times_between(chrono::Utc::now(), chrono::Utc::now() + chrono::Duration::hours(8))
        .into_iter()
        .next()
        .unwrap();
    let payments = monitor.process_funding_at(next_boundary);

    println!("  Settled {} payment(s) at {}", payments.len(), next_boundary);
    println!("  LONG pays ${} at +0.01% rate", payments[0].payment_amount.abs());
    println!("  Net funding: ${}", monitor.total_funding());
}

// 10.0: stop-loss / take-profit monitor. a polling background task: each tick
// batch-fetches one price per open symbol, checks take-profit before stop-loss
// (profit-taking wins when both are numerically true in the same tick), and
// force-closes through the engine's settle path. also drives the pending
// limit-order fill check.

use crate::engine::PaperEngine;
use crate::position::PaperPosition;
use crate::types::{CloseReason, PositionId, Side, Symbol};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Called with the position and the trigger price after a forced close.
pub type TriggerHook = Arc<dyn Fn(&PaperPosition, Decimal) + Send + Sync>;
/// Called with the position, current price, and estimated liquidation price.
pub type WarningHook = Arc<dyn Fn(&PaperPosition, Decimal, Decimal) + Send + Sync>;

/// Positions within this percentage of their liquidation price raise a
/// non-fatal warning.
const LIQUIDATION_WARNING_BAND_PERCENT: Decimal = dec!(10);

/// Outcome of a single monitoring pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SltpCheckReport {
    pub sl_triggered: u64,
    pub tp_triggered: u64,
    pub limit_orders_filled: usize,
}

struct MonitorInner {
    engine: Arc<Mutex<PaperEngine>>,
    checks_performed: AtomicU64,
    sl_triggered: AtomicU64,
    tp_triggered: AtomicU64,
    on_stoploss: Option<TriggerHook>,
    on_takeprofit: Option<TriggerHook>,
    on_liquidation_warning: Option<WarningHook>,
}

/// Background SL/TP monitor. State machine: Stopped -> Running -> Stopped;
/// `stop` waits for the in-flight tick so no mutation outlives it.
pub struct SltpMonitor {
    inner: Arc<MonitorInner>,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl SltpMonitor {
    pub fn new(engine: Arc<Mutex<PaperEngine>>) -> Self {
        Self::with_interval(engine, Duration::from_secs(5))
    }

    pub fn with_interval(engine: Arc<Mutex<PaperEngine>>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                engine,
                checks_performed: AtomicU64::new(0),
                sl_triggered: AtomicU64::new(0),
                tp_triggered: AtomicU64::new(0),
                on_stoploss: None,
                on_takeprofit: None,
                on_liquidation_warning: None,
            }),
            interval,
            handle: None,
            shutdown_tx: None,
        }
    }

    /// Install callbacks before `start`; they run on the monitor task.
    pub fn with_hooks(
        mut self,
        on_stoploss: Option<TriggerHook>,
        on_takeprofit: Option<TriggerHook>,
        on_liquidation_warning: Option<WarningHook>,
    ) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("hooks set before start");
        inner.on_stoploss = on_stoploss;
        inner.on_takeprofit = on_takeprofit;
        inner.on_liquidation_warning = on_liquidation_warning;
        self
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn checks_performed(&self) -> u64 {
        self.inner.checks_performed.load(Ordering::Relaxed)
    }

    pub fn sl_triggered_count(&self) -> u64 {
        self.inner.sl_triggered.load(Ordering::Relaxed)
    }

    pub fn tp_triggered_count(&self) -> u64 {
        self.inner.tp_triggered.load(Ordering::Relaxed)
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            warn!("SL/TP monitor already running");
            return;
        }

        let (tx, mut rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let interval = self.interval;

        self.shutdown_tx = Some(tx);
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inner.run_check();
                    }
                    _ = rx.changed() => break,
                }
            }
        }));

        info!(interval_secs = interval.as_secs(), "SL/TP monitor started");
    }

    /// Signal shutdown and wait for the current tick to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("SL/TP monitor stopped");
    }

    /// One synchronous pass for callers that drive their own loop.
    pub fn run_check_now(&self) -> SltpCheckReport {
        self.inner.run_check()
    }
}

impl MonitorInner {
    fn run_check(&self) -> SltpCheckReport {
        self.checks_performed.fetch_add(1, Ordering::Relaxed);
        let mut report = SltpCheckReport::default();

        // snapshot open positions, then fetch prices without holding the lock
        let (targets, feed) = {
            let engine = self.engine.lock().unwrap();
            let targets: Vec<(PositionId, Symbol)> = engine
                .positions_snapshot()
                .into_iter()
                .map(|p| (p.position_id, p.symbol))
                .collect();
            (targets, engine.price_feed())
        };

        let symbols: Vec<Symbol> = {
            let mut seen = Vec::new();
            for (_, symbol) in &targets {
                if !seen.contains(symbol) {
                    seen.push(symbol.clone());
                }
            }
            seen
        };
        let prices = feed.get_prices_batch(&symbols);

        let mut engine = self.engine.lock().unwrap();
        for (position_id, symbol) in targets {
            let Some(price) = prices.get(&symbol).copied() else {
                continue;
            };
            if let Err(err) = self.check_position(&mut engine, &position_id, price, &mut report) {
                error!(%position_id, %err, "SL/TP check failed for position");
            }
        }

        report.limit_orders_filled = engine.check_limit_orders().len();
        report
    }

    fn check_position(
        &self,
        engine: &mut PaperEngine,
        position_id: &PositionId,
        price: Decimal,
        report: &mut SltpCheckReport,
    ) -> Result<(), crate::error::TradingError> {
        let mmr = engine.config().maintenance_margin_rate;
        let Some(position) = engine.position_mut(position_id) else {
            return Ok(()); // closed by a foreground call since the snapshot
        };
        if !position.is_open() {
            return Ok(());
        }
        position.update_pnl(price);

        // take-profit first: the user's primary intent
        let tp_hit = position.takeprofit_price.is_some_and(|tp| match position.side {
            Side::Long => price >= tp,
            Side::Short => price <= tp,
        });
        if tp_hit {
            info!(%position_id, %price, "take-profit triggered");
            engine.force_close_position(position_id, price, CloseReason::Takeprofit)?;
            self.tp_triggered.fetch_add(1, Ordering::Relaxed);
            report.tp_triggered += 1;
            if let Some(hook) = &self.on_takeprofit {
                hook(&engine.positions_by_id(position_id).unwrap(), price);
            }
            return Ok(());
        }

        let Some(position) = engine.position_mut(position_id) else {
            return Ok(());
        };
        let sl_hit = position.stoploss_price.is_some_and(|sl| match position.side {
            Side::Long => price <= sl,
            Side::Short => price >= sl,
        });
        if sl_hit {
            info!(%position_id, %price, "stop-loss triggered");
            engine.force_close_position(position_id, price, CloseReason::Stoploss)?;
            self.sl_triggered.fetch_add(1, Ordering::Relaxed);
            report.sl_triggered += 1;
            if let Some(hook) = &self.on_stoploss {
                hook(&engine.positions_by_id(position_id).unwrap(), price);
            }
            return Ok(());
        }

        // neither fired: advisory warning when near the liquidation estimate
        let Some(position) = engine.position_mut(position_id) else {
            return Ok(());
        };
        if position.liquidation_price.is_none() {
            position.liquidation_price = position.calculate_liquidation_price(mmr);
        }
        if let Some(liq_price) = position.liquidation_price {
            let distance = match position.side {
                Side::Long => (price - liq_price) / price * Decimal::ONE_HUNDRED,
                Side::Short => (liq_price - price) / price * Decimal::ONE_HUNDRED,
            };
            if distance < LIQUIDATION_WARNING_BAND_PERCENT {
                warn!(
                    %position_id, symbol = %position.symbol, current = %price,
                    liquidation = %liq_price, distance_pct = %distance.round_dp(1),
                    "position approaching liquidation"
                );
                if let Some(hook) = &self.on_liquidation_warning {
                    let snapshot = position.clone();
                    hook(&snapshot, price, liq_price);
                }
            }
        }
        Ok(())
    }
}

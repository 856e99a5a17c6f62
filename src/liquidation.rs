// 6.0: liquidation engine for isolated margin. each position carries its own
// margin; when the margin balance (initial margin + unrealized pnl) falls to
// the maintenance margin, the position is force-closed at the mark and a
// liquidation fee is charged. warnings fire once per position below the
// warning threshold and re-arm after recovery.
//
// liquidation price, isolated margin:
//   LONG:  entry * (1 - 1/leverage + MMR)
//   SHORT: entry * (1 + 1/leverage - MMR)

use crate::engine::PaperEngine;
use crate::error::TradingError;
use crate::position::PaperPosition;
use crate::types::{PositionId, Side, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct LiquidationParams {
    /// Maintenance margin rate against notional. 0.5% by default.
    pub maintenance_margin_rate: Decimal,
    /// Fee charged on the liquidated notional. 0.5% by default.
    pub liquidation_fee_rate: Decimal,
    /// Margin ratios below this warn without liquidating.
    pub warning_threshold: Decimal,
}

impl Default for LiquidationParams {
    fn default() -> Self {
        Self {
            maintenance_margin_rate: dec!(0.005),
            liquidation_fee_rate: dec!(0.005),
            warning_threshold: dec!(1.5),
        }
    }
}

/// Margin health snapshot for one position at one mark price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginStatus {
    pub position_id: PositionId,
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub quantity: Decimal,
    pub leverage: u32,

    pub initial_margin: Decimal,
    pub maintenance_margin: Decimal,
    pub unrealized_pnl: Decimal,
    /// initial_margin + unrealized_pnl
    pub margin_balance: Decimal,
    /// margin_balance / maintenance_margin
    pub margin_ratio: Decimal,
    pub liquidation_price: Decimal,

    pub is_at_risk: bool,
    pub is_liquidatable: bool,
    /// Percentage distance from the mark to the liquidation price.
    pub distance_to_liq: Decimal,
}

/// Record of one executed liquidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub liquidation_id: String,
    pub position_id: PositionId,
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: Decimal,
    pub liquidation_price: Decimal,
    pub mark_price_at_liq: Decimal,
    pub quantity: Decimal,
    pub liquidation_fee: Decimal,
    pub realized_pnl: Decimal,
    pub liquidation_time: DateTime<Utc>,
    pub leverage: u32,
}

/// Pure margin-health computation, shared by the monitor and status queries.
pub fn margin_status(
    position: &PaperPosition,
    mark_price: Decimal,
    params: &LiquidationParams,
) -> MarginStatus {
    let notional = position.quantity * position.entry_price;
    let initial_margin = notional / position.leverage.as_decimal();
    let maintenance_margin = notional * params.maintenance_margin_rate;

    let unrealized_pnl = position.calculate_unrealized_pnl(mark_price);
    let margin_balance = initial_margin + unrealized_pnl;
    let margin_ratio = if maintenance_margin > Decimal::ZERO {
        margin_balance / maintenance_margin
    } else {
        dec!(999)
    };

    let liquidation_price = position
        .calculate_liquidation_price(params.maintenance_margin_rate)
        .unwrap_or(Decimal::ZERO);
    let distance_to_liq = if mark_price.is_zero() {
        Decimal::ZERO
    } else {
        match position.side {
            Side::Long => (mark_price - liquidation_price) / mark_price * Decimal::ONE_HUNDRED,
            Side::Short => (liquidation_price - mark_price) / mark_price * Decimal::ONE_HUNDRED,
        }
    };

    MarginStatus {
        position_id: position.position_id.clone(),
        symbol: position.symbol.clone(),
        side: position.side,
        entry_price: position.entry_price,
        mark_price,
        quantity: position.quantity,
        leverage: position.leverage.value(),
        initial_margin,
        maintenance_margin,
        unrealized_pnl,
        margin_balance,
        margin_ratio,
        liquidation_price,
        is_at_risk: margin_ratio < params.warning_threshold,
        is_liquidatable: margin_ratio <= Decimal::ONE,
        distance_to_liq,
    }
}

pub type LiquidationHook = Arc<dyn Fn(&LiquidationEvent) + Send + Sync>;
pub type MarginWarningHook = Arc<dyn Fn(&MarginStatus) + Send + Sync>;

struct LiquidationInner {
    engine: Arc<Mutex<PaperEngine>>,
    params: LiquidationParams,
    /// Positions already warned; cleared when they recover.
    warned: Mutex<HashSet<PositionId>>,
    liquidations: Mutex<Vec<LiquidationEvent>>,
    on_liquidation: Option<LiquidationHook>,
    on_margin_warning: Option<MarginWarningHook>,
}

/// Background liquidation monitor.
pub struct LiquidationEngine {
    inner: Arc<LiquidationInner>,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl LiquidationEngine {
    pub fn new(engine: Arc<Mutex<PaperEngine>>) -> Self {
        Self::with_params(engine, LiquidationParams::default(), Duration::from_secs(5))
    }

    pub fn with_params(
        engine: Arc<Mutex<PaperEngine>>,
        params: LiquidationParams,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(LiquidationInner {
                engine,
                params,
                warned: Mutex::new(HashSet::new()),
                liquidations: Mutex::new(Vec::new()),
                on_liquidation: None,
                on_margin_warning: None,
            }),
            interval,
            handle: None,
            shutdown_tx: None,
        }
    }

    pub fn with_hooks(
        mut self,
        on_liquidation: Option<LiquidationHook>,
        on_margin_warning: Option<MarginWarningHook>,
    ) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("hooks set before start");
        inner.on_liquidation = on_liquidation;
        inner.on_margin_warning = on_margin_warning;
        self
    }

    pub fn params(&self) -> &LiquidationParams {
        &self.inner.params
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn liquidations(&self) -> Vec<LiquidationEvent> {
        self.inner.liquidations.lock().unwrap().clone()
    }

    pub fn total_liquidation_fees(&self) -> Decimal {
        self.inner
            .liquidations
            .lock()
            .unwrap()
            .iter()
            .map(|l| l.liquidation_fee)
            .sum()
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            warn!("liquidation engine already running");
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
                        inner.check_positions();
                    }
                    _ = rx.changed() => break,
                }
            }
        }));

        info!(interval_secs = interval.as_secs(), "liquidation engine started");
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("liquidation engine stopped");
    }

    /// One synchronous monitoring pass; returns executed liquidations.
    pub fn check_now(&self) -> Vec<LiquidationEvent> {
        self.inner.check_positions()
    }

    /// Margin status for every open position at current marks.
    pub fn all_margin_status(&self) -> Vec<MarginStatus> {
        let (positions, marks) = self.inner.snapshot_with_marks();
        positions
            .iter()
            .filter_map(|p| {
                marks
                    .get(&p.symbol)
                    .map(|mark| margin_status(p, *mark, &self.inner.params))
            })
            .collect()
    }

    pub fn at_risk_positions(&self) -> Vec<MarginStatus> {
        self.all_margin_status()
            .into_iter()
            .filter(|s| s.is_at_risk)
            .collect()
    }
}

impl LiquidationInner {
    fn snapshot_with_marks(
        &self,
    ) -> (Vec<PaperPosition>, std::collections::HashMap<Symbol, Decimal>) {
        let (positions, feed) = {
            let engine = self.engine.lock().unwrap();
            (engine.positions_snapshot(), engine.price_feed())
        };
        let symbols: Vec<Symbol> = {
            let mut seen = Vec::new();
            for p in &positions {
                if !seen.contains(&p.symbol) {
                    seen.push(p.symbol.clone());
                }
            }
            seen
        };
        let marks = feed.get_prices_batch(&symbols);
        (positions, marks)
    }

    fn check_positions(&self) -> Vec<LiquidationEvent> {
        let (positions, marks) = self.snapshot_with_marks();
        let mut executed = Vec::new();

        for position in positions {
            let Some(mark) = marks.get(&position.symbol).copied() else {
                continue;
            };
            let status = margin_status(&position, mark, &self.params);

            if status.is_liquidatable {
                match self.liquidate(&position, &status) {
                    Ok(event) => executed.push(event),
                    Err(err) => {
                        error!(position_id = %position.position_id, %err, "liquidation failed");
                    }
                }
            } else if status.is_at_risk {
                self.warn_margin(&status);
            } else {
                // recovered above the threshold; re-arm the warning
                self.warned.lock().unwrap().remove(&position.position_id);
            }
        }
        executed
    }

    fn liquidate(
        &self,
        position: &PaperPosition,
        status: &MarginStatus,
    ) -> Result<LiquidationEvent, TradingError> {
        warn!(
            position_id = %position.position_id, symbol = %position.symbol,
            side = %position.side, mark = %status.mark_price,
            liq = %status.liquidation_price, "liquidating position"
        );

        let notional_at_liq = position.quantity * status.mark_price;
        let liquidation_fee = notional_at_liq * self.params.liquidation_fee_rate;

        let realized_pnl = {
            let mut engine = self.engine.lock().unwrap();
            engine.liquidate_position(
                &position.position_id,
                status.mark_price,
                self.params.liquidation_fee_rate,
            )?
        };

        let event = LiquidationEvent {
            liquidation_id: format!("paper_liq_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
            position_id: position.position_id.clone(),
            symbol: position.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            liquidation_price: status.liquidation_price,
            mark_price_at_liq: status.mark_price,
            quantity: position.quantity,
            liquidation_fee,
            realized_pnl,
            liquidation_time: Utc::now(),
            leverage: position.leverage.value(),
        };

        self.warned.lock().unwrap().remove(&position.position_id);
        self.liquidations.lock().unwrap().push(event.clone());

        warn!(
            position_id = %event.position_id, pnl = %event.realized_pnl,
            fee = %event.liquidation_fee, "position liquidated"
        );
        if let Some(hook) = &self.on_liquidation {
            hook(&event);
        }
        Ok(event)
    }

    fn warn_margin(&self, status: &MarginStatus) {
        // once per excursion below the threshold
        if !self.warned.lock().unwrap().insert(status.position_id.clone()) {
            return;
        }

        warn!(
            position_id = %status.position_id, symbol = %status.symbol,
            margin_ratio = %status.margin_ratio.round_dp(2),
            distance_pct = %status.distance_to_liq.round_dp(1),
            "margin warning"
        );
        if let Some(hook) = &self.on_margin_warning {
            hook(status);
        }
    }
}

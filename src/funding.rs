// 5.0: funding settlement. every 8 hours (00:00/08:00/16:00 UTC) longs pay
// shorts or vice versa, sized as quantity * mark * rate. settlement is
// exactly-once per position per boundary: the monitor tracks the last settled
// boundary and replays only boundaries strictly after it, so polling faster
// than the cycle is harmless.

use crate::engine::PaperEngine;
use crate::error::TradingError;
use crate::types::{PositionId, Side, Symbol};
use chrono::{DateTime, Duration, Timelike, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Funding boundaries in UTC hours.
const FUNDING_HOURS: [u32; 3] = [0, 8, 16];

/// External source for per-symbol funding rates. A live implementation wraps
/// an exchange's public data endpoint; the mock serves a settable table.
pub trait FundingRateSource: Send + Sync {
    fn funding_rate(&self, symbol: &Symbol) -> Result<Decimal, TradingError>;
}

pub struct MockFundingRateSource {
    rates: Mutex<HashMap<Symbol, Decimal>>,
    default_rate: Decimal,
}

impl MockFundingRateSource {
    /// Defaults every symbol to +0.01% per interval.
    pub fn new() -> Self {
        Self {
            rates: Mutex::new(HashMap::new()),
            default_rate: dec!(0.0001),
        }
    }

    pub fn with_default_rate(default_rate: Decimal) -> Self {
        Self {
            rates: Mutex::new(HashMap::new()),
            default_rate,
        }
    }

    pub fn set_rate(&self, symbol: Symbol, rate: Decimal) {
        self.rates.lock().unwrap().insert(symbol, rate);
    }
}

impl Default for MockFundingRateSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FundingRateSource for MockFundingRateSource {
    fn funding_rate(&self, symbol: &Symbol) -> Result<Decimal, TradingError> {
        Ok(self
            .rates
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .unwrap_or(self.default_rate))
    }
}

// 5.1: signed payment. positive = position receives, negative = position pays.
// positive rate: longs pay shorts. negative rate: shorts pay longs.
pub fn calculate_funding_payment(
    side: Side,
    quantity: Decimal,
    mark_price: Decimal,
    funding_rate: Decimal,
) -> Decimal {
    -side.sign() * quantity * mark_price * funding_rate
}

/// All funding boundaries strictly after `start`, up to and including `end`.
pub fn funding_times_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut times = Vec::new();
    let mut day = start
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight exists")
        .and_utc();

    while day <= end {
        for hour in FUNDING_HOURS {
            let boundary = day.with_hour(hour).expect("funding hour is valid");
            if boundary > start && boundary <= end {
                times.push(boundary);
            }
        }
        day += Duration::days(1);
    }
    times
}

/// Ledger entry for one settled funding interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingPayment {
    pub payment_id: String,
    pub position_id: PositionId,
    pub symbol: Symbol,
    pub side: Side,
    pub funding_rate: Decimal,
    /// Notional at settlement.
    pub position_value: Decimal,
    /// Positive = received, negative = paid.
    pub payment_amount: Decimal,
    pub payment_time: DateTime<Utc>,
    pub mark_price: Decimal,
    pub quantity: Decimal,
}

impl FundingPayment {
    pub fn is_received(&self) -> bool {
        self.payment_amount > Decimal::ZERO
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundingStats {
    pub total_paid: Decimal,
    pub total_received: Decimal,
    pub net_funding: Decimal,
    pub payment_count: u64,
}

impl FundingStats {
    fn add_payment(&mut self, amount: Decimal) {
        self.payment_count += 1;
        if amount > Decimal::ZERO {
            self.total_received += amount;
        } else {
            self.total_paid += amount.abs();
        }
        self.net_funding = self.total_received - self.total_paid;
    }
}

/// Serializable monitor state for persistence alongside the engine blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundingMonitorState {
    pub payments: Vec<FundingPayment>,
    pub last_settled: HashMap<String, DateTime<Utc>>,
    pub stats: FundingStats,
}

pub type FundingHook = Arc<dyn Fn(&FundingPayment) + Send + Sync>;

struct FundingInner {
    engine: Arc<Mutex<PaperEngine>>,
    rate_source: Arc<dyn FundingRateSource>,
    enabled: AtomicBool,
    /// Last settled boundary per position.
    last_settled: Mutex<HashMap<PositionId, DateTime<Utc>>>,
    payments: Mutex<Vec<FundingPayment>>,
    stats: Mutex<FundingStats>,
    on_payment: Option<FundingHook>,
}

/// Background monitor settling funding each elapsed 8-hour boundary.
pub struct FundingMonitor {
    inner: Arc<FundingInner>,
    interval: std::time::Duration,
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl FundingMonitor {
    pub fn new(engine: Arc<Mutex<PaperEngine>>, rate_source: Arc<dyn FundingRateSource>) -> Self {
        Self::with_interval(engine, rate_source, std::time::Duration::from_secs(60))
    }

    pub fn with_interval(
        engine: Arc<Mutex<PaperEngine>>,
        rate_source: Arc<dyn FundingRateSource>,
        interval: std::time::Duration,
    ) -> Self {
        Self {
            inner: Arc::new(FundingInner {
                engine,
                rate_source,
                enabled: AtomicBool::new(true),
                last_settled: Mutex::new(HashMap::new()),
                payments: Mutex::new(Vec::new()),
                stats: Mutex::new(FundingStats::default()),
                on_payment: None,
            }),
            interval,
            handle: None,
            shutdown_tx: None,
        }
    }

    pub fn with_payment_hook(mut self, hook: FundingHook) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("hook set before start");
        inner.on_payment = Some(hook);
        self
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn payments(&self) -> Vec<FundingPayment> {
        self.inner.payments.lock().unwrap().clone()
    }

    pub fn position_payments(&self, position_id: &PositionId) -> Vec<FundingPayment> {
        self.inner
            .payments
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.position_id == *position_id)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> FundingStats {
        self.inner.stats.lock().unwrap().clone()
    }

    /// Net funding over the monitor's life (received minus paid).
    pub fn total_funding(&self) -> Decimal {
        self.inner.stats.lock().unwrap().net_funding
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            warn!("funding monitor already running");
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
                        if inner.enabled.load(Ordering::Relaxed) {
                            inner.process_funding(Utc::now());
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
        }));

        info!(interval_secs = interval.as_secs(), "funding monitor started");
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("funding monitor stopped");
    }

    /// Settle all elapsed boundaries as of `now`. Exposed for tests and for
    /// callers driving their own loop.
    pub fn process_funding_at(&self, now: DateTime<Utc>) -> Vec<FundingPayment> {
        self.inner.process_funding(now)
    }

    pub fn clear_history(&self) {
        self.inner.payments.lock().unwrap().clear();
        self.inner.last_settled.lock().unwrap().clear();
        *self.inner.stats.lock().unwrap() = FundingStats::default();
    }

    pub fn to_state(&self) -> FundingMonitorState {
        FundingMonitorState {
            payments: self.payments(),
            last_settled: self
                .inner
                .last_settled
                .lock()
                .unwrap()
                .iter()
                .map(|(id, t)| (id.0.clone(), *t))
                .collect(),
            stats: self.stats(),
        }
    }

    pub fn restore_state(&self, state: FundingMonitorState) {
        *self.inner.payments.lock().unwrap() = state.payments;
        *self.inner.last_settled.lock().unwrap() = state
            .last_settled
            .into_iter()
            .map(|(id, t)| (PositionId(id), t))
            .collect();
        *self.inner.stats.lock().unwrap() = state.stats;
    }
}

impl FundingInner {
    fn process_funding(&self, now: DateTime<Utc>) -> Vec<FundingPayment> {
        // snapshot positions and fetch marks before taking the lock for writes
        let (positions, feed) = {
            let engine = self.engine.lock().unwrap();
            (engine.positions_snapshot(), engine.price_feed())
        };
        if positions.is_empty() {
            return Vec::new();
        }

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

        let mut settled = Vec::new();
        for position in &positions {
            let Some(mark_price) = marks.get(&position.symbol).copied() else {
                continue;
            };
            let rate = match self.rate_source.funding_rate(&position.symbol) {
                Ok(rate) => rate,
                Err(err) => {
                    warn!(symbol = %position.symbol, %err, "funding rate unavailable, skipping");
                    continue;
                }
            };

            let start = self
                .last_settled
                .lock()
                .unwrap()
                .get(&position.position_id)
                .copied()
                .unwrap_or(position.opened_at);

            for boundary in funding_times_between(start, now) {
                let payment_amount =
                    calculate_funding_payment(position.side, position.quantity, mark_price, rate);
                let payment = FundingPayment {
                    payment_id: format!("paper_fund_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
                    position_id: position.position_id.clone(),
                    symbol: position.symbol.clone(),
                    side: position.side,
                    funding_rate: rate,
                    position_value: position.quantity * mark_price,
                    payment_amount,
                    payment_time: boundary,
                    mark_price,
                    quantity: position.quantity,
                };

                self.apply_payment(&payment);
                self.last_settled
                    .lock()
                    .unwrap()
                    .insert(position.position_id.clone(), boundary);
                settled.push(payment);
            }
        }

        // drop settlement markers for positions that no longer exist open
        let open_ids: Vec<PositionId> = positions.iter().map(|p| p.position_id.clone()).collect();
        self.last_settled
            .lock()
            .unwrap()
            .retain(|id, _| open_ids.contains(id));

        settled
    }

    fn apply_payment(&self, payment: &FundingPayment) {
        {
            let mut engine = self.engine.lock().unwrap();
            engine.apply_funding(payment.payment_amount);
        }
        self.payments.lock().unwrap().push(payment.clone());
        self.stats.lock().unwrap().add_payment(payment.payment_amount);

        info!(
            symbol = %payment.symbol, side = %payment.side, rate = %payment.funding_rate,
            amount = %payment.payment_amount, at = %payment.payment_time,
            "funding settled"
        );
        if let Some(hook) = &self.on_payment {
            hook(payment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn payment_direction_matrix() {
        // positive rate: long pays, short receives
        let paid = calculate_funding_payment(Side::Long, dec!(1), dec!(100000), dec!(0.0001));
        assert_eq!(paid, dec!(-10));
        let received = calculate_funding_payment(Side::Short, dec!(1), dec!(100000), dec!(0.0001));
        assert_eq!(received, dec!(10));

        // negative rate: short pays, long receives
        let received = calculate_funding_payment(Side::Long, dec!(1), dec!(100000), dec!(-0.0001));
        assert_eq!(received, dec!(10));
        let paid = calculate_funding_payment(Side::Short, dec!(1), dec!(100000), dec!(-0.0001));
        assert_eq!(paid, dec!(-10));
    }

    #[test]
    fn boundaries_are_exclusive_of_start() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();

        let times = funding_times_between(start, end);
        // 16:00 on day one and 00:00 on day two; 08:00 itself is excluded
        assert_eq!(times.len(), 2);
        assert_eq!(times[0].hour(), 16);
        assert_eq!(times[1].hour(), 0);
    }

    #[test]
    fn no_boundaries_in_short_window() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 1, 15, 0, 0).unwrap();
        assert!(funding_times_between(start, end).is_empty());
    }

    #[test]
    fn stats_accumulate() {
        let mut stats = FundingStats::default();
        stats.add_payment(dec!(10));
        stats.add_payment(dec!(-4));
        assert_eq!(stats.total_received, dec!(10));
        assert_eq!(stats.total_paid, dec!(4));
        assert_eq!(stats.net_funding, dec!(6));
        assert_eq!(stats.payment_count, 2);
    }
}

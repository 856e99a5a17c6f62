// 8.1: main engine struct. one engine = one simulated account; all state
// lives here and every transport (REST, MCP, CLI) calls through these methods.

use super::config::EngineConfig;
use super::results::TradingStatistics;
use crate::error::TradingError;
use crate::order::PaperOrder;
use crate::position::PaperPosition;
use crate::price_feed::PriceFeed;
use crate::trade::TradeRecord;
use crate::types::{Leverage, OrderId, OrderStatus, PositionId, PositionStatus, Symbol};
use crate::wallet::PaperWallet;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct PaperEngine {
    pub(crate) config: EngineConfig,
    pub(crate) price_feed: Arc<dyn PriceFeed>,
    pub(crate) wallet: PaperWallet,
    pub(crate) orders: HashMap<OrderId, PaperOrder>,
    pub(crate) positions: HashMap<PositionId, PaperPosition>,
    pub(crate) trade_history: Vec<TradeRecord>,
    /// Pending limit orders per symbol, in placement order.
    pub(crate) pending_orders: HashMap<Symbol, Vec<OrderId>>,
    /// Per-symbol leverage defaults. Symbols without an entry default to 1x.
    pub(crate) leverage_settings: HashMap<Symbol, Leverage>,
}

impl PaperEngine {
    pub fn new(initial_balance: Decimal, price_feed: Arc<dyn PriceFeed>) -> Self {
        Self::with_config(initial_balance, price_feed, EngineConfig::default())
    }

    pub fn with_config(
        initial_balance: Decimal,
        price_feed: Arc<dyn PriceFeed>,
        config: EngineConfig,
    ) -> Self {
        info!(%initial_balance, "paper trading engine initialized");
        Self {
            config,
            price_feed,
            wallet: PaperWallet::new(initial_balance),
            orders: HashMap::new(),
            positions: HashMap::new(),
            trade_history: Vec::new(),
            pending_orders: HashMap::new(),
            leverage_settings: HashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn price_feed(&self) -> Arc<dyn PriceFeed> {
        Arc::clone(&self.price_feed)
    }

    // ------------------------------------------------------------------
    // Wallet
    // ------------------------------------------------------------------

    /// Wallet snapshot with unrealized PnL refreshed from open positions.
    pub fn get_wallet(&mut self) -> PaperWallet {
        self.refresh_open_pnl();
        self.wallet.clone()
    }

    /// Wallet as last updated, without touching the price feed.
    pub fn wallet(&self) -> &PaperWallet {
        &self.wallet
    }

    /// Clear all positions, orders, and history; restart from `new_balance`
    /// (or the current balance when omitted).
    pub fn reset_wallet(&mut self, new_balance: Option<Decimal>) {
        let balance = new_balance.unwrap_or(self.wallet.balance);
        self.wallet = PaperWallet::new(balance);
        self.orders.clear();
        self.positions.clear();
        self.trade_history.clear();
        self.pending_orders.clear();
        self.leverage_settings.clear();
        info!(%balance, "wallet reset");
    }

    // ------------------------------------------------------------------
    // Leverage settings
    // ------------------------------------------------------------------

    /// Per-symbol leverage default. Returns 1x for symbols never configured,
    /// no error inference involved.
    pub fn get_leverage(&self, symbol: &Symbol) -> Leverage {
        self.leverage_settings
            .get(symbol)
            .copied()
            .unwrap_or(Leverage::ONE)
    }

    pub fn set_leverage(&mut self, symbol: Symbol, leverage: Leverage) -> Result<(), TradingError> {
        self.price_feed.validate_leverage(&symbol, leverage)?;
        info!(%symbol, %leverage, "leverage set");
        self.leverage_settings.insert(symbol, leverage);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_order(&self, order_id: &OrderId) -> Result<PaperOrder, TradingError> {
        self.orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| TradingError::OrderNotFound(order_id.clone()))
    }

    pub fn list_open_orders(&self) -> Vec<PaperOrder> {
        self.orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending)
            .cloned()
            .collect()
    }

    pub fn get_order_history(&self, limit: usize) -> Vec<PaperOrder> {
        let mut orders: Vec<_> = self.orders.values().cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders.truncate(limit);
        orders
    }

    /// Position by id, PnL refreshed from the feed when still open. A feed
    /// hiccup leaves the last computed PnL in place rather than failing the
    /// lookup.
    pub fn get_position(&mut self, position_id: &PositionId) -> Result<PaperPosition, TradingError> {
        let feed = Arc::clone(&self.price_feed);
        let position = self
            .positions
            .get_mut(position_id)
            .ok_or_else(|| TradingError::PositionNotFound(position_id.clone()))?;

        if position.is_open() {
            if let Ok(price) = feed.get_price(&position.symbol) {
                position.update_pnl(price);
            }
        }
        Ok(position.clone())
    }

    /// All open positions with PnL refreshed; also rolls the total into the
    /// wallet's unrealized figure.
    pub fn list_open_positions(&mut self) -> Vec<PaperPosition> {
        self.refresh_open_pnl();
        self.positions
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect()
    }

    pub fn get_position_history(&self, limit: usize) -> Vec<PaperPosition> {
        let mut closed: Vec<_> = self
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Closed)
            .cloned()
            .collect();
        closed.sort_by(|a, b| {
            b.closed_at
                .unwrap_or(b.opened_at)
                .cmp(&a.closed_at.unwrap_or(a.opened_at))
        });
        closed.truncate(limit);
        closed
    }

    pub fn get_trade_history(&self, limit: usize) -> Vec<TradeRecord> {
        let mut history = self.trade_history.clone();
        history.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        history.truncate(limit);
        history
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    pub fn get_statistics(&mut self) -> TradingStatistics {
        self.refresh_open_pnl();

        let open_positions = self.positions.values().filter(|p| p.is_open()).count();
        let closed: Vec<_> = self
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Closed)
            .collect();

        let winning = closed.iter().filter(|p| p.realized_pnl > Decimal::ZERO).count();
        let losing = closed.iter().filter(|p| p.realized_pnl < Decimal::ZERO).count();
        // no closed history means no meaningful win rate, not a zero one
        let win_rate = if closed.is_empty() {
            None
        } else {
            Some(Decimal::from(winning) / Decimal::from(closed.len()) * Decimal::ONE_HUNDRED)
        };

        TradingStatistics {
            total_balance: self.wallet.balance,
            available_balance: self.wallet.available,
            locked_margin: self.wallet.locked_margin,
            unrealized_pnl: self.wallet.unrealized_pnl,
            realized_pnl: self.wallet.realized_pnl,
            total_pnl: self.wallet.realized_pnl + self.wallet.unrealized_pnl,
            total_fees_paid: self.wallet.total_fees_paid,
            open_positions,
            closed_positions: closed.len(),
            winning_trades: winning,
            losing_trades: losing,
            win_rate,
        }
    }

    /// Settle a signed funding payment into the wallet.
    pub(crate) fn apply_funding(&mut self, amount: Decimal) {
        self.wallet.apply_funding(amount);
    }

    /// Open positions as last updated, without touching the feed. Monitors
    /// snapshot from this before fetching prices.
    pub(crate) fn positions_snapshot(&self) -> Vec<PaperPosition> {
        self.positions.values().filter(|p| p.is_open()).cloned().collect()
    }

    pub(crate) fn position_mut(&mut self, position_id: &PositionId) -> Option<&mut PaperPosition> {
        self.positions.get_mut(position_id)
    }

    pub(crate) fn positions_by_id(&self, position_id: &PositionId) -> Option<PaperPosition> {
        self.positions.get(position_id).cloned()
    }

    /// Recompute unrealized PnL for every open position and sum into the
    /// wallet. One feed call per open symbol.
    pub(crate) fn refresh_open_pnl(&mut self) {
        let symbols: Vec<Symbol> = {
            let mut seen = Vec::new();
            for p in self.positions.values().filter(|p| p.is_open()) {
                if !seen.contains(&p.symbol) {
                    seen.push(p.symbol.clone());
                }
            }
            seen
        };
        let prices = self.price_feed.get_prices_batch(&symbols);

        let mut total = Decimal::ZERO;
        for position in self.positions.values_mut().filter(|p| p.is_open()) {
            if let Some(price) = prices.get(&position.symbol) {
                position.update_pnl(*price);
            }
            total += position.unrealized_pnl;
        }
        self.wallet.unrealized_pnl = total;
    }
}

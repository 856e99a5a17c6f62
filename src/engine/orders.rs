//! Order creation, execution, and the limit-order fill check.
//!
//! Every path validates fully before the first wallet mutation: a rejected
//! order leaves no partial state behind beyond its own REJECTED record.

use super::core::PaperEngine;
use crate::error::TradingError;
use crate::order::PaperOrder;
use crate::trade::TradeRecord;
use crate::types::{round_to_step, Leverage, OrderId, OrderStatus, Side, Symbol};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

impl PaperEngine {
    /// Create and immediately execute a market order at the current feed price.
    #[allow(clippy::too_many_arguments)]
    pub fn create_market_order(
        &mut self,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        leverage: Leverage,
        stoploss_price: Option<Decimal>,
        takeprofit_price: Option<Decimal>,
        reduce_only: bool,
    ) -> Result<PaperOrder, TradingError> {
        let current_price = self.price_feed.get_price(&symbol)?;
        let quantity = self.validate_order_terms(&symbol, quantity, leverage)?;

        let mut order = PaperOrder::new_market(symbol, side, quantity, leverage, reduce_only);
        order.stoploss_price = stoploss_price;
        order.takeprofit_price = takeprofit_price;

        self.execute_order(order, current_price)
    }

    /// Create a limit order. Margin plus the projected fee must be available
    /// up front; the margin is reserved until fill, cancel, or expiry.
    #[allow(clippy::too_many_arguments)]
    pub fn create_limit_order(
        &mut self,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        leverage: Leverage,
        stoploss_price: Option<Decimal>,
        takeprofit_price: Option<Decimal>,
        reduce_only: bool,
    ) -> Result<PaperOrder, TradingError> {
        if !self.price_feed.is_valid_symbol(&symbol) {
            return Err(TradingError::SymbolNotFound(symbol));
        }
        if price <= Decimal::ZERO {
            return Err(TradingError::invalid_order("price", price, "must be positive"));
        }
        let quantity = self.validate_order_terms(&symbol, quantity, leverage)?;

        let notional = quantity * price;
        let required_margin = notional / leverage.as_decimal();
        let fee = notional * self.config.fee_rate;
        if self.wallet.available < required_margin + fee {
            return Err(TradingError::InsufficientMargin {
                required: required_margin + fee,
                available: self.wallet.available,
            });
        }

        let expires_at = Utc::now() + Duration::hours(self.config.limit_order_expiry_hours);
        let mut order =
            PaperOrder::new_limit(symbol.clone(), side, quantity, price, leverage, reduce_only, expires_at);
        order.stoploss_price = stoploss_price;
        order.takeprofit_price = takeprofit_price;
        order.margin_used = required_margin;

        self.wallet.lock_margin(required_margin)?;
        self.pending_orders
            .entry(symbol)
            .or_default()
            .push(order.order_id.clone());
        self.orders.insert(order.order_id.clone(), order.clone());

        info!(
            order_id = %order.order_id, side = %order.side, quantity = %order.quantity,
            symbol = %order.symbol, %price, "limit order created"
        );
        Ok(order)
    }

    /// Cancel a pending order, releasing its reserved margin. Filled orders
    /// error; other terminal states return `false`.
    pub fn cancel_order(&mut self, order_id: &OrderId) -> Result<bool, TradingError> {
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| TradingError::OrderNotFound(order_id.clone()))?;

        if order.status == OrderStatus::Filled {
            return Err(TradingError::OrderAlreadyFilled(order_id.clone()));
        }
        if order.status != OrderStatus::Pending {
            return Ok(false);
        }

        order.cancel();
        let margin = order.margin_used;
        let symbol = order.symbol.clone();
        if margin > Decimal::ZERO {
            self.wallet.release_margin(margin);
        }
        self.remove_pending(&symbol, order_id);

        info!(%order_id, "order cancelled");
        Ok(true)
    }

    /// Poll-driven fill check for all pending limit orders. Expired orders
    /// release their margin; marketable orders execute at their limit price.
    /// Returns the orders filled this pass.
    pub fn check_limit_orders(&mut self) -> Vec<PaperOrder> {
        let mut filled = Vec::new();
        let symbols: Vec<Symbol> = self.pending_orders.keys().cloned().collect();
        let now = Utc::now();

        for symbol in symbols {
            let current_price = match self.price_feed.get_price(&symbol) {
                Ok(p) => p,
                Err(err) => {
                    warn!(%symbol, %err, "skipping limit check, price unavailable");
                    continue;
                }
            };

            let order_ids = self
                .pending_orders
                .get(&symbol)
                .cloned()
                .unwrap_or_default();

            for order_id in order_ids {
                let Some(mut order) = self.orders.get(&order_id).cloned() else {
                    self.remove_pending(&symbol, &order_id);
                    continue;
                };
                if !order.is_pending() {
                    self.remove_pending(&symbol, &order_id);
                    continue;
                }

                if order.is_expired_at(now) {
                    order.expire();
                    self.wallet.release_margin(order.margin_used);
                    self.orders.insert(order_id.clone(), order);
                    self.remove_pending(&symbol, &order_id);
                    info!(%order_id, "limit order expired, margin released");
                    continue;
                }

                if order.limit_fill_met(current_price) {
                    let limit_price = order.price.expect("limit order has price");

                    // the reservation is released and the fill re-runs the
                    // standard commit path: an order whose margin no longer
                    // fits is rejected, not filled into a negative wallet
                    self.wallet.release_margin(order.margin_used);
                    order.margin_used = Decimal::ZERO;
                    self.remove_pending(&symbol, &order_id);

                    match self.execute_order(order, limit_price) {
                        Ok(order) => filled.push(order),
                        Err(err) => {
                            warn!(%order_id, %err, "limit order fill rejected");
                        }
                    }
                }
            }
        }

        filled
    }

    /// Round the quantity to the symbol's step and run feed-side validation.
    fn validate_order_terms(
        &self,
        symbol: &Symbol,
        quantity: Decimal,
        leverage: Leverage,
    ) -> Result<Decimal, TradingError> {
        let info = self.price_feed.get_asset_info(symbol)?;
        let quantity = round_to_step(quantity, info.quantity_step);
        if quantity <= Decimal::ZERO {
            return Err(TradingError::invalid_order(
                "quantity",
                quantity,
                "rounds to zero at the symbol's step size",
            ));
        }
        self.price_feed.validate_quantity(symbol, quantity)?;
        self.price_feed.validate_leverage(symbol, leverage)?;
        Ok(quantity)
    }

    /// The commit path shared by market orders and limit fills.
    ///
    /// Margin is locked only for the exposure-opening portion of the order;
    /// the portion netting an opposite position settles through the close
    /// path instead. Validation (margin sufficiency) happens before any
    /// wallet mutation.
    pub(crate) fn execute_order(
        &mut self,
        mut order: PaperOrder,
        execution_price: Decimal,
    ) -> Result<PaperOrder, TradingError> {
        let notional = order.quantity * execution_price;
        let fee = notional * self.config.fee_rate;

        if order.reduce_only {
            return self.execute_reduce_only(order, execution_price);
        }

        let same = self.find_open_position(&order.symbol, order.side);
        let opposite = self.find_open_position(&order.symbol, order.side.opposite());

        // how much of the order opens new exposure vs nets the opposite side
        let (reduce_qty, opening_qty) = match &opposite {
            Some(pos_id) => {
                let held = self.positions[pos_id].quantity;
                let reduced = order.quantity.min(held);
                (reduced, order.quantity - reduced)
            }
            None => (Decimal::ZERO, order.quantity),
        };

        let required_margin = opening_qty * execution_price / order.leverage.as_decimal();
        let total_required = required_margin + fee;
        if self.wallet.available < total_required {
            order.reject();
            self.orders.insert(order.order_id.clone(), order);
            return Err(TradingError::InsufficientMargin {
                required: total_required,
                available: self.wallet.available,
            });
        }

        if required_margin > Decimal::ZERO {
            self.wallet.lock_margin(required_margin)?;
        }
        self.wallet.deduct_fee(fee);
        order.fee_paid = fee;
        order.margin_used = required_margin;

        let position_id = if reduce_qty > Decimal::ZERO {
            let opposite_id = opposite.expect("reduce quantity implies opposite position");
            self.net_against_position(&opposite_id, &order, reduce_qty, opening_qty, execution_price)?
        } else if let Some(same_id) = same {
            Some(self.average_into_position(&same_id, &order, execution_price))
        } else {
            Some(self.open_position_for_order(&order, order.quantity, execution_price, required_margin))
        };

        order.fill(execution_price, position_id.clone());
        if opening_qty > Decimal::ZERO {
            let position_id = position_id.expect("opening quantity implies a position");
            self.trade_history.push(TradeRecord::open(
                order.order_id.clone(),
                position_id,
                order.symbol.clone(),
                order.side,
                opening_qty,
                execution_price,
                fee,
            ));
        }
        self.orders.insert(order.order_id.clone(), order.clone());

        info!(
            order_id = %order.order_id, side = %order.side, quantity = %order.quantity,
            symbol = %order.symbol, price = %execution_price, margin = %required_margin,
            %fee, "order executed"
        );
        Ok(order)
    }

    /// Reduce-only orders may shrink or close opposing exposure, never open
    /// any. No opposing position is a hard error.
    fn execute_reduce_only(
        &mut self,
        mut order: PaperOrder,
        execution_price: Decimal,
    ) -> Result<PaperOrder, TradingError> {
        let Some(position_id) = self.find_open_position(&order.symbol, order.side.opposite()) else {
            order.reject();
            self.orders.insert(order.order_id.clone(), order);
            return Err(TradingError::invalid_order(
                "reduce_only",
                true,
                "no position to reduce",
            ));
        };

        let held = self.positions[&position_id].quantity;
        if order.quantity >= held {
            self.close_position_at(&position_id, execution_price, crate::types::CloseReason::Manual, Some(order.order_id.clone()))?;
        } else {
            self.partial_close_at(&position_id, order.quantity, execution_price, Some(order.order_id.clone()))?;
        }

        order.fill(execution_price, Some(position_id));
        self.orders.insert(order.order_id.clone(), order.clone());
        Ok(order)
    }

    pub(crate) fn remove_pending(&mut self, symbol: &Symbol, order_id: &OrderId) {
        if let Some(ids) = self.pending_orders.get_mut(symbol) {
            ids.retain(|id| id != order_id);
            if ids.is_empty() {
                self.pending_orders.remove(symbol);
            }
        }
    }
}

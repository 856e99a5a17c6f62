//! Position netting and close settlement.
//!
//! The tie-break set here decides realized-vs-unrealized PnL attribution:
//! same-side fills average in, opposite-side fills net off, and an oversized
//! opposite fill closes then flips. At most one open position exists per
//! (symbol, side) at any time.

use super::core::PaperEngine;
use crate::error::TradingError;
use crate::order::PaperOrder;
use crate::position::PaperPosition;
use crate::trade::TradeRecord;
use crate::types::{CloseReason, OrderId, PositionId, Side, Symbol, TradeAction};
use rust_decimal::Decimal;
use tracing::info;

impl PaperEngine {
    pub(crate) fn find_open_position(&self, symbol: &Symbol, side: Side) -> Option<PositionId> {
        self.positions
            .values()
            .find(|p| p.is_open() && p.symbol == *symbol && p.side == side)
            .map(|p| p.position_id.clone())
    }

    /// Open a fresh position for an order's (sub-)quantity.
    pub(crate) fn open_position_for_order(
        &mut self,
        order: &PaperOrder,
        quantity: Decimal,
        entry_price: Decimal,
        margin: Decimal,
    ) -> PositionId {
        let mut position = PaperPosition::open(
            order.symbol.clone(),
            order.side,
            quantity,
            entry_price,
            order.leverage,
            margin,
        );
        position.stoploss_price = order.stoploss_price;
        position.takeprofit_price = order.takeprofit_price;
        position.liquidation_price =
            position.calculate_liquidation_price(self.config.maintenance_margin_rate);

        let id = position.position_id.clone();
        info!(
            position_id = %id, side = %position.side, %quantity,
            symbol = %position.symbol, entry = %entry_price, "position opened"
        );
        self.positions.insert(id.clone(), position);
        id
    }

    /// Same-side fill: volume-weighted average entry, additive margin.
    pub(crate) fn average_into_position(
        &mut self,
        position_id: &PositionId,
        order: &PaperOrder,
        execution_price: Decimal,
    ) -> PositionId {
        let mmr = self.config.maintenance_margin_rate;
        let position = self.positions.get_mut(position_id).expect("open position");

        let old_notional = position.quantity * position.entry_price;
        let new_notional = order.quantity * execution_price;
        let new_quantity = position.quantity + order.quantity;

        position.entry_price = (old_notional + new_notional) / new_quantity;
        position.quantity = new_quantity;
        position.margin += order.margin_used;
        if order.stoploss_price.is_some() {
            position.stoploss_price = order.stoploss_price;
        }
        if order.takeprofit_price.is_some() {
            position.takeprofit_price = order.takeprofit_price;
        }
        position.liquidation_price = position.calculate_liquidation_price(mmr);
        position.updated_at = chrono::Utc::now();

        info!(
            position_id = %position_id, quantity = %position.quantity,
            entry = %position.entry_price, "position averaged"
        );
        position_id.clone()
    }

    /// Opposite-side fill: net off the reducing quantity, then open any
    /// remainder on the order's side. Returns the surviving open position.
    pub(crate) fn net_against_position(
        &mut self,
        opposite_id: &PositionId,
        order: &PaperOrder,
        reduce_qty: Decimal,
        opening_qty: Decimal,
        execution_price: Decimal,
    ) -> Result<Option<PositionId>, TradingError> {
        let held = self.positions[opposite_id].quantity;

        if reduce_qty >= held {
            self.close_position_at(
                opposite_id,
                execution_price,
                CloseReason::Manual,
                Some(order.order_id.clone()),
            )?;
        } else {
            self.partial_close_at(
                opposite_id,
                reduce_qty,
                execution_price,
                Some(order.order_id.clone()),
            )?;
        }

        if opening_qty > Decimal::ZERO {
            let id =
                self.open_position_for_order(order, opening_qty, execution_price, order.margin_used);
            info!(closed = %opposite_id, opened = %id, remainder = %opening_qty, "position flipped");
            return Ok(Some(id));
        }

        // partial close leaves the original open; exact netting leaves nothing
        if reduce_qty < held {
            Ok(Some(opposite_id.clone()))
        } else {
            Ok(None)
        }
    }

    // ------------------------------------------------------------------
    // Closes
    // ------------------------------------------------------------------

    /// Close a position at the current feed price. `quantity` omitted or at
    /// least the remaining size closes fully; anything less is partial.
    pub fn close_position(
        &mut self,
        position_id: &PositionId,
        quantity: Option<Decimal>,
    ) -> Result<PaperPosition, TradingError> {
        let position = self
            .positions
            .get(position_id)
            .ok_or_else(|| TradingError::PositionNotFound(position_id.clone()))?;
        if !position.is_open() {
            return Err(TradingError::PositionAlreadyClosed(position_id.clone()));
        }

        let symbol = position.symbol.clone();
        let held = position.quantity;
        let current_price = self.price_feed.get_price(&symbol)?;

        match quantity {
            Some(q) if q < held => {
                self.partial_close_at(position_id, q, current_price, None)?;
            }
            _ => {
                self.close_position_at(position_id, current_price, CloseReason::Manual, None)?;
            }
        }

        Ok(self.positions[position_id].clone())
    }

    /// Force-close at a known price on behalf of a monitor (SL/TP trigger).
    /// Same settlement as a manual close, tagged with the trigger reason.
    pub fn force_close_position(
        &mut self,
        position_id: &PositionId,
        exit_price: Decimal,
        reason: CloseReason,
    ) -> Result<Decimal, TradingError> {
        self.close_position_at(position_id, exit_price, reason, None)
    }

    /// Liquidation close: exit at the mark, fee charged at the liquidation
    /// rate instead of the taker rate. The wallet absorbs whatever loss the
    /// margin did not cover.
    pub fn liquidate_position(
        &mut self,
        position_id: &PositionId,
        mark_price: Decimal,
        liquidation_fee_rate: Decimal,
    ) -> Result<Decimal, TradingError> {
        self.settle_close(
            position_id,
            mark_price,
            CloseReason::Liquidation,
            None,
            liquidation_fee_rate,
        )
    }

    pub(crate) fn close_position_at(
        &mut self,
        position_id: &PositionId,
        exit_price: Decimal,
        reason: CloseReason,
        order_id: Option<OrderId>,
    ) -> Result<Decimal, TradingError> {
        let fee_rate = self.config.fee_rate;
        self.settle_close(position_id, exit_price, reason, order_id, fee_rate)
    }

    /// Full-close settlement: realize PnL net of the exit fee, release the
    /// position's margin, append the ledger entry. Returns net PnL.
    fn settle_close(
        &mut self,
        position_id: &PositionId,
        exit_price: Decimal,
        reason: CloseReason,
        order_id: Option<OrderId>,
        fee_rate: Decimal,
    ) -> Result<Decimal, TradingError> {
        let position = self
            .positions
            .get_mut(position_id)
            .ok_or_else(|| TradingError::PositionNotFound(position_id.clone()))?;
        if !position.is_open() {
            return Err(TradingError::PositionAlreadyClosed(position_id.clone()));
        }

        let quantity = position.quantity;
        let entry_price = position.entry_price;
        let margin = position.margin;
        let symbol = position.symbol.clone();
        let side = position.side;

        let gross_pnl = position.close(exit_price, reason);
        let exit_fee = quantity * exit_price * fee_rate;
        let net_pnl = gross_pnl - exit_fee;

        self.wallet.realize_pnl(net_pnl, margin);
        self.wallet.record_fee(exit_fee);

        self.trade_history.push(TradeRecord::close(
            order_id,
            position_id.clone(),
            symbol.clone(),
            side,
            TradeAction::from_close_reason(reason),
            quantity,
            exit_price,
            exit_fee,
            net_pnl,
            entry_price,
        ));

        info!(
            %position_id, %symbol, exit = %exit_price, ?reason, pnl = %net_pnl,
            "position closed"
        );
        Ok(net_pnl)
    }

    /// Partial-close settlement: proportional PnL and margin, entry price
    /// untouched, position stays open.
    pub(crate) fn partial_close_at(
        &mut self,
        position_id: &PositionId,
        quantity: Decimal,
        exit_price: Decimal,
        order_id: Option<OrderId>,
    ) -> Result<Decimal, TradingError> {
        let position = self
            .positions
            .get_mut(position_id)
            .ok_or_else(|| TradingError::PositionNotFound(position_id.clone()))?;
        if !position.is_open() {
            return Err(TradingError::PositionAlreadyClosed(position_id.clone()));
        }

        let entry_price = position.entry_price;
        let symbol = position.symbol.clone();
        let side = position.side;
        let remaining_before = position.quantity;

        let (pnl, released_margin) = position.partial_close(quantity, exit_price);
        self.wallet.realize_pnl(pnl, released_margin);

        self.trade_history.push(TradeRecord::close(
            order_id,
            position_id.clone(),
            symbol.clone(),
            side,
            TradeAction::PartialClose,
            quantity,
            exit_price,
            Decimal::ZERO,
            pnl,
            entry_price,
        ));

        info!(
            %position_id, %symbol, closed = %quantity,
            remaining = %(remaining_before - quantity), %pnl, "position partially closed"
        );
        Ok(pnl)
    }

    // ------------------------------------------------------------------
    // Risk orders
    // ------------------------------------------------------------------

    pub fn set_stoploss(
        &mut self,
        position_id: &PositionId,
        stoploss_price: Decimal,
    ) -> Result<(), TradingError> {
        self.set_risk_order(position_id, Some(stoploss_price), None)
    }

    pub fn set_takeprofit(
        &mut self,
        position_id: &PositionId,
        takeprofit_price: Decimal,
    ) -> Result<(), TradingError> {
        self.set_risk_order(position_id, None, Some(takeprofit_price))
    }

    /// Set either or both protective prices on an open position.
    pub fn set_risk_order(
        &mut self,
        position_id: &PositionId,
        stoploss_price: Option<Decimal>,
        takeprofit_price: Option<Decimal>,
    ) -> Result<(), TradingError> {
        let position = self
            .positions
            .get_mut(position_id)
            .ok_or_else(|| TradingError::PositionNotFound(position_id.clone()))?;
        if !position.is_open() {
            return Err(TradingError::PositionAlreadyClosed(position_id.clone()));
        }

        if let Some(sl) = stoploss_price {
            position.stoploss_price = Some(sl);
        }
        if let Some(tp) = takeprofit_price {
            position.takeprofit_price = Some(tp);
        }
        position.updated_at = chrono::Utc::now();

        info!(%position_id, ?stoploss_price, ?takeprofit_price, "risk orders set");
        Ok(())
    }
}

//! Append-only trade ledger.
//!
//! One record per execution. Records are never mutated or deleted; the engine
//! pushes them and readers sort/slice.

use crate::types::{OrderId, PositionId, Side, Symbol, TradeAction, TradeId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: TradeId,
    /// Empty for closes not driven by an order (manual close, SL/TP, liquidation).
    pub order_id: Option<OrderId>,
    pub position_id: PositionId,
    pub symbol: Symbol,
    pub side: Side,
    pub action: TradeAction,

    pub quantity: Decimal,
    pub price: Decimal,
    pub notional: Decimal,
    pub fee: Decimal,

    /// Net of fees, close actions only.
    pub pnl: Option<Decimal>,
    pub pnl_percent: Option<Decimal>,

    pub executed_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn open(
        order_id: OrderId,
        position_id: PositionId,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        fee: Decimal,
    ) -> Self {
        Self {
            trade_id: TradeId::generate(),
            order_id: Some(order_id),
            position_id,
            symbol,
            side,
            action: TradeAction::Open,
            quantity,
            price,
            notional: quantity * price,
            fee,
            pnl: None,
            pnl_percent: None,
            executed_at: Utc::now(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn close(
        order_id: Option<OrderId>,
        position_id: PositionId,
        symbol: Symbol,
        side: Side,
        action: TradeAction,
        quantity: Decimal,
        price: Decimal,
        fee: Decimal,
        pnl: Decimal,
        entry_price: Decimal,
    ) -> Self {
        let entry_notional = quantity * entry_price;
        let pnl_percent = if entry_notional.is_zero() {
            Decimal::ZERO
        } else {
            pnl / entry_notional * Decimal::ONE_HUNDRED
        };
        Self {
            trade_id: TradeId::generate(),
            order_id,
            position_id,
            symbol,
            side,
            action,
            quantity,
            price,
            notional: quantity * price,
            fee,
            pnl: Some(pnl),
            pnl_percent: Some(pnl_percent),
            executed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn open_record_has_no_pnl() {
        let rec = TradeRecord::open(
            OrderId::generate(),
            PositionId::generate(),
            Symbol::from("BTCUSDT"),
            Side::Long,
            dec!(0.1),
            dec!(95000),
            dec!(4.75),
        );
        assert_eq!(rec.action, TradeAction::Open);
        assert_eq!(rec.notional, dec!(9500.0));
        assert!(rec.pnl.is_none());
    }

    #[test]
    fn close_record_carries_pnl_percent() {
        let rec = TradeRecord::close(
            None,
            PositionId::generate(),
            Symbol::from("BTCUSDT"),
            Side::Long,
            TradeAction::Close,
            dec!(0.1),
            dec!(100000),
            dec!(5),
            dec!(495),
            dec!(95000),
        );
        // 495 / 9500 * 100
        assert_eq!(rec.pnl_percent.unwrap().round_dp(4), dec!(5.2105));
    }
}

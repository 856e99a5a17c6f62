// 3.0: simulated order record and its small state machine.
// Pending is the only live state; fill/cancel/expire/reject are one-way doors.

use crate::types::{Leverage, OrderId, OrderStatus, OrderType, PositionId, Side, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperOrder {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub leverage: Leverage,
    pub status: OrderStatus,

    /// Limit price. None for market orders.
    pub price: Option<Decimal>,
    /// Actual execution price once filled.
    pub filled_price: Option<Decimal>,

    pub stoploss_price: Option<Decimal>,
    pub takeprofit_price: Option<Decimal>,
    pub reduce_only: bool,

    pub fee_paid: Decimal,
    /// Margin this order actually locked. Zero for pure reduce executions.
    pub margin_used: Decimal,

    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Limit orders only.
    pub expires_at: Option<DateTime<Utc>>,

    /// The position this order opened or touched.
    pub position_id: Option<PositionId>,
}

impl PaperOrder {
    pub fn new_market(
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        leverage: Leverage,
        reduce_only: bool,
    ) -> Self {
        Self {
            order_id: OrderId::generate(),
            symbol,
            side,
            order_type: OrderType::Market,
            quantity,
            leverage,
            status: OrderStatus::Pending,
            price: None,
            filled_price: None,
            stoploss_price: None,
            takeprofit_price: None,
            reduce_only,
            fee_paid: Decimal::ZERO,
            margin_used: Decimal::ZERO,
            created_at: Utc::now(),
            filled_at: None,
            cancelled_at: None,
            expires_at: None,
            position_id: None,
        }
    }

    pub fn new_limit(
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        leverage: Leverage,
        reduce_only: bool,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: OrderId::generate(),
            symbol,
            side,
            order_type: OrderType::Limit,
            quantity,
            leverage,
            status: OrderStatus::Pending,
            price: Some(price),
            filled_price: None,
            stoploss_price: None,
            takeprofit_price: None,
            reduce_only,
            fee_paid: Decimal::ZERO,
            margin_used: Decimal::ZERO,
            created_at: Utc::now(),
            filled_at: None,
            cancelled_at: None,
            expires_at: Some(expires_at),
            position_id: None,
        }
    }

    pub fn fill(&mut self, price: Decimal, position_id: Option<PositionId>) {
        self.status = OrderStatus::Filled;
        self.filled_price = Some(price);
        self.filled_at = Some(Utc::now());
        self.position_id = position_id;
    }

    pub fn cancel(&mut self) {
        self.status = OrderStatus::Cancelled;
        self.cancelled_at = Some(Utc::now());
    }

    pub fn expire(&mut self) {
        self.status = OrderStatus::Expired;
        self.cancelled_at = Some(Utc::now());
    }

    pub fn reject(&mut self) {
        self.status = OrderStatus::Rejected;
    }

    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if now > exp)
    }

    /// Notional from the execution price, falling back to the limit price.
    pub fn notional_value(&self) -> Decimal {
        let price = self.filled_price.or(self.price).unwrap_or(Decimal::ZERO);
        self.quantity * price
    }

    /// Does `current_price` satisfy this limit order? A buy limit fills on a
    /// dip to or below the limit; a sell limit on a rise to or above it.
    pub fn limit_fill_met(&self, current_price: Decimal) -> bool {
        match (self.order_type, self.price) {
            (OrderType::Limit, Some(limit)) => match self.side {
                Side::Long => current_price <= limit,
                Side::Short => current_price >= limit,
            },
            _ => false,
        }
    }
}

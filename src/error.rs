// 2.0: the error taxonomy. one enum, one stable machine code per variant so
// transports (REST, MCP, CLI) can map failures without string matching.
// liquidation warnings are advisory and never surface here; they go out
// through callbacks/logs only.

use crate::types::{OrderId, PositionId, Symbol};
use rust_decimal::Decimal;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TradingError {
    #[error("insufficient margin: required {required}, available {available}")]
    InsufficientMargin { required: Decimal, available: Decimal },

    #[error("invalid order: {field}={value}: {reason}")]
    InvalidOrder {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("position not found: {0}")]
    PositionNotFound(PositionId),

    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("symbol not found or not tradeable: {0}")]
    SymbolNotFound(Symbol),

    #[error("position already closed: {0}")]
    PositionAlreadyClosed(PositionId),

    #[error("order already filled: {0}")]
    OrderAlreadyFilled(OrderId),

    #[error("price fetch failed for {symbol}: {reason}")]
    PriceFetch { symbol: Symbol, reason: String },

    #[error("persistence failure: {reason}")]
    Persistence { reason: String },
}

impl TradingError {
    pub fn invalid_order(
        field: &'static str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        TradingError::InvalidOrder {
            field,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable code for wire protocols. Never reworded.
    pub fn code(&self) -> &'static str {
        match self {
            TradingError::InsufficientMargin { .. } => "INSUFFICIENT_MARGIN",
            TradingError::InvalidOrder { .. } => "INVALID_ORDER",
            TradingError::PositionNotFound(_) => "POSITION_NOT_FOUND",
            TradingError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            TradingError::SymbolNotFound(_) => "SYMBOL_NOT_FOUND",
            TradingError::PositionAlreadyClosed(_) => "POSITION_CLOSED",
            TradingError::OrderAlreadyFilled(_) => "ORDER_FILLED",
            TradingError::PriceFetch { .. } => "PRICE_FETCH_ERROR",
            TradingError::Persistence { .. } => "PERSISTENCE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn codes_are_stable() {
        let err = TradingError::InsufficientMargin {
            required: dec!(500),
            available: dec!(300),
        };
        assert_eq!(err.code(), "INSUFFICIENT_MARGIN");
        assert!(err.to_string().contains("500"));

        let err = TradingError::invalid_order("quantity", dec!(0), "below minimum 0.001");
        assert_eq!(err.code(), "INVALID_ORDER");
        assert!(err.to_string().contains("quantity"));
    }
}

//! Engine configuration options.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Taker fee charged on every execution notional. 5 bps by default.
    pub fee_rate: Decimal,
    /// Pending limit orders expire after this many hours.
    pub limit_order_expiry_hours: i64,
    /// Maintenance margin rate used for liquidation-price estimates.
    pub maintenance_margin_rate: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_rate: dec!(0.0005),
            limit_order_expiry_hours: 24,
            maintenance_margin_rate: dec!(0.005),
        }
    }
}

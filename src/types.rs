// 1.0: all the primitives live here. nothing in the engine works without these types.
// symbols, ids, sides, order/position lifecycle enums. ids are newtypes so the
// compiler catches a position id handed to an order lookup.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

// 1.1: trading pair symbol, e.g. "BTCUSDT". owned string because symbols come
// from callers and price feeds, not a static universe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

fn paper_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("paper_{}_{}", prefix, &hex[..12])
}

macro_rules! string_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(paper_id($prefix))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(OrderId, "ord");
string_id!(PositionId, "pos");
string_id!(TradeId, "trd");

// Long = profit when price goes up. Short = profit when price goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => -Decimal::ONE,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
}

// 1.2: order lifecycle. Pending -> Filled | Cancelled | Expired; Rejected is
// terminal from the start. terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Expired,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    Manual,
    Stoploss,
    Takeprofit,
    Liquidation,
}

// ledger actions. one per execution, tagged with how the close happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    Open,
    Close,
    PartialClose,
    SlTriggered,
    TpTriggered,
    Liquidation,
}

impl TradeAction {
    pub fn from_close_reason(reason: CloseReason) -> Self {
        match reason {
            CloseReason::Manual => TradeAction::Close,
            CloseReason::Stoploss => TradeAction::SlTriggered,
            CloseReason::Takeprofit => TradeAction::TpTriggered,
            CloseReason::Liquidation => TradeAction::Liquidation,
        }
    }
}

// 1.3: leverage multiplier. whole units, must be >= 1x.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Leverage(u32);

impl Leverage {
    pub const ONE: Leverage = Leverage(1);

    #[must_use]
    pub fn new(value: u32) -> Option<Self> {
        if value >= 1 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn as_decimal(&self) -> Decimal {
        Decimal::from(self.0)
    }

    // 10x leverage -> 10% margin fraction (1/10)
    pub fn initial_margin_fraction(&self) -> Decimal {
        Decimal::ONE / Decimal::from(self.0)
    }
}

impl fmt::Display for Leverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

// 1.4: snap a quantity to the symbol's step grid, half rounds away from zero.
// 0.1234 at step 0.001 -> 0.123; 0.1235 -> 0.124.
pub fn round_to_step(quantity: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return quantity;
    }
    let steps = (quantity / step).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    (steps * step).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn side_sign_and_opposite() {
        assert_eq!(Side::Long.sign(), dec!(1));
        assert_eq!(Side::Short.sign(), dec!(-1));
        assert_eq!(Side::Long.opposite(), Side::Short);
        assert_eq!(Side::Short.opposite(), Side::Long);
    }

    #[test]
    fn leverage_margin_fraction() {
        let lev = Leverage::new(10).unwrap();
        assert_eq!(lev.initial_margin_fraction(), dec!(0.1));
        assert!(Leverage::new(0).is_none());
    }

    #[test]
    fn id_generation_is_prefixed_and_unique() {
        let a = OrderId::generate();
        let b = OrderId::generate();
        assert!(a.as_str().starts_with("paper_ord_"));
        assert_ne!(a, b);
    }

    #[test]
    fn step_rounding() {
        assert_eq!(round_to_step(dec!(0.1234), dec!(0.001)), dec!(0.123));
        assert_eq!(round_to_step(dec!(0.1235), dec!(0.001)), dec!(0.124));
        assert_eq!(round_to_step(dec!(1.5), dec!(1)), dec!(2));
        // degenerate step leaves quantity untouched
        assert_eq!(round_to_step(dec!(0.42), dec!(0)), dec!(0.42));
    }

    #[test]
    fn order_status_terminality() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
    }
}

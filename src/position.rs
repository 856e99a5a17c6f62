// 4.0: simulated position. pnl = sign * qty * (mark - entry).
// 4.1 has the close/partial-close math; the engine's netting logic sits on top.

use crate::types::{CloseReason, Leverage, PositionId, PositionStatus, Side, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperPosition {
    pub position_id: PositionId,
    pub symbol: Symbol,
    pub side: Side,
    pub status: PositionStatus,

    pub quantity: Decimal,
    /// Volume-weighted average across fills.
    pub entry_price: Decimal,
    pub leverage: Leverage,

    /// Margin currently locked for this position.
    pub margin: Decimal,
    pub unrealized_pnl: Decimal,
    /// Accumulated from partial closes, final on full close.
    pub realized_pnl: Decimal,

    pub stoploss_price: Option<Decimal>,
    pub takeprofit_price: Option<Decimal>,
    pub liquidation_price: Option<Decimal>,

    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,

    pub close_reason: Option<CloseReason>,
    pub exit_price: Option<Decimal>,
}

impl PaperPosition {
    pub fn open(
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        entry_price: Decimal,
        leverage: Leverage,
        margin: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            position_id: PositionId::generate(),
            symbol,
            side,
            status: PositionStatus::Open,
            quantity,
            entry_price,
            leverage,
            margin,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            stoploss_price: None,
            takeprofit_price: None,
            liquidation_price: None,
            opened_at: now,
            closed_at: None,
            updated_at: now,
            close_reason: None,
            exit_price: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Notional at entry.
    pub fn notional_value(&self) -> Decimal {
        self.quantity * self.entry_price
    }

    // 4.1: paper gains/losses against the current mark
    pub fn calculate_unrealized_pnl(&self, mark_price: Decimal) -> Decimal {
        self.side.sign() * self.quantity * (mark_price - self.entry_price)
    }

    pub fn update_pnl(&mut self, mark_price: Decimal) {
        self.unrealized_pnl = self.calculate_unrealized_pnl(mark_price);
        self.updated_at = Utc::now();
    }

    /// Return on equity: PnL over margin, in percent.
    pub fn roe_percent(&self) -> Decimal {
        if self.margin.is_zero() {
            return Decimal::ZERO;
        }
        self.unrealized_pnl / self.margin * Decimal::ONE_HUNDRED
    }

    /// PnL as a percentage of entry notional.
    pub fn pnl_percentage(&self) -> Decimal {
        let notional = self.notional_value();
        if notional.is_zero() {
            return Decimal::ZERO;
        }
        self.unrealized_pnl / notional * Decimal::ONE_HUNDRED
    }

    // 4.2: isolated-margin liquidation estimate.
    //   LONG:  entry * (1 - 1/lev + mmr)
    //   SHORT: entry * (1 + 1/lev - mmr)
    pub fn calculate_liquidation_price(&self, mmr: Decimal) -> Option<Decimal> {
        if self.quantity.is_zero() {
            return None;
        }
        let imf = self.leverage.initial_margin_fraction();
        let liq = match self.side {
            Side::Long => self.entry_price * (Decimal::ONE - imf + mmr),
            Side::Short => self.entry_price * (Decimal::ONE + imf - mmr),
        };
        Some(liq)
    }

    /// Close the whole position. Returns the gross realized PnL at `exit_price`;
    /// the engine nets fees and settles the wallet.
    pub fn close(&mut self, exit_price: Decimal, reason: CloseReason) -> Decimal {
        let final_pnl = self.calculate_unrealized_pnl(exit_price);
        let now = Utc::now();

        self.status = PositionStatus::Closed;
        self.closed_at = Some(now);
        self.updated_at = now;
        self.close_reason = Some(reason);
        self.exit_price = Some(exit_price);
        self.realized_pnl += final_pnl;
        self.unrealized_pnl = Decimal::ZERO;

        final_pnl
    }

    /// Close `close_quantity` of the position at `exit_price`. Realizes the
    /// proportional share of PnL and margin; entry price stays unchanged.
    /// Returns (realized pnl, released margin).
    pub fn partial_close(&mut self, close_quantity: Decimal, exit_price: Decimal) -> (Decimal, Decimal) {
        debug_assert!(
            close_quantity > Decimal::ZERO && close_quantity <= self.quantity,
            "partial close quantity must be within position size"
        );

        let ratio = close_quantity / self.quantity;
        let partial_pnl = self.calculate_unrealized_pnl(exit_price) * ratio;
        let released_margin = self.margin * ratio;

        self.quantity -= close_quantity;
        self.margin -= released_margin;
        self.realized_pnl += partial_pnl;
        self.updated_at = Utc::now();

        if self.quantity.is_zero() {
            self.status = PositionStatus::Closed;
            self.closed_at = Some(Utc::now());
            self.close_reason = Some(CloseReason::Manual);
            self.exit_price = Some(exit_price);
            self.unrealized_pnl = Decimal::ZERO;
        }

        (partial_pnl, released_margin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_position() -> PaperPosition {
        PaperPosition::open(
            Symbol::from("BTCUSDT"),
            Side::Long,
            dec!(0.1),
            dec!(95000),
            Leverage::new(10).unwrap(),
            dec!(950),
        )
    }

    #[test]
    fn unrealized_pnl_long() {
        let pos = long_position();
        assert_eq!(pos.calculate_unrealized_pnl(dec!(100000)), dec!(500));
        assert_eq!(pos.calculate_unrealized_pnl(dec!(90000)), dec!(-500));
    }

    #[test]
    fn unrealized_pnl_short() {
        let mut pos = long_position();
        pos.side = Side::Short;
        assert_eq!(pos.calculate_unrealized_pnl(dec!(90000)), dec!(500));
        assert_eq!(pos.calculate_unrealized_pnl(dec!(100000)), dec!(-500));
    }

    #[test]
    fn roe_tracks_leverage() {
        let mut pos = long_position();
        pos.update_pnl(dec!(100000));
        // 500 pnl on 950 margin
        assert_eq!(pos.roe_percent().round_dp(2), dec!(52.63));
    }

    #[test]
    fn liquidation_price_formula() {
        let pos = long_position();
        // 95000 * (1 - 0.1 + 0.005) = 85975
        assert_eq!(pos.calculate_liquidation_price(dec!(0.005)), Some(dec!(85975.000)));

        let mut short = long_position();
        short.side = Side::Short;
        // 95000 * (1 + 0.1 - 0.005) = 104025
        assert_eq!(short.calculate_liquidation_price(dec!(0.005)), Some(dec!(104025.000)));
    }

    #[test]
    fn full_close_realizes_everything() {
        let mut pos = long_position();
        let pnl = pos.close(dec!(100000), CloseReason::Manual);
        assert_eq!(pnl, dec!(500));
        assert_eq!(pos.status, PositionStatus::Closed);
        assert_eq!(pos.exit_price, Some(dec!(100000)));
        assert_eq!(pos.close_reason, Some(CloseReason::Manual));
        assert_eq!(pos.unrealized_pnl, dec!(0));
    }

    #[test]
    fn partial_close_is_proportional() {
        let mut pos = long_position(); // 0.1 @ 95000, margin 950
        let (pnl, released) = pos.partial_close(dec!(0.04), dec!(100000));

        // 40% of the 500 unrealized
        assert_eq!(pnl, dec!(200.0));
        assert_eq!(released, dec!(380.0));
        assert_eq!(pos.quantity, dec!(0.06));
        assert_eq!(pos.margin, dec!(570.0));
        assert_eq!(pos.entry_price, dec!(95000)); // unchanged
        assert!(pos.is_open());
    }

    #[test]
    fn partial_close_of_everything_closes() {
        let mut pos = long_position();
        let (pnl, released) = pos.partial_close(dec!(0.1), dec!(100000));
        assert_eq!(pnl, dec!(500));
        assert_eq!(released, dec!(950));
        assert_eq!(pos.status, PositionStatus::Closed);
    }
}

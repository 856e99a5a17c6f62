//! Virtual wallet and margin accounting.
//!
//! The wallet is the single ledger behind every fill, close, and fee. The
//! invariant `balance == available + locked_margin` holds exactly after every
//! mutation, and `available` can never go negative: the four mutation entry
//! points below are the only way engine code touches wallet fields.

use crate::error::TradingError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperWallet {
    /// Total equity (excludes unrealized PnL).
    pub balance: Decimal,
    /// Free for new margin and fees.
    pub available: Decimal,
    /// Margin reserved by open positions and pending limit orders.
    pub locked_margin: Decimal,
    /// Derived; recomputed from open positions on read paths.
    pub unrealized_pnl: Decimal,
    /// Cumulative realized PnL over the wallet's life.
    pub realized_pnl: Decimal,
    pub total_fees_paid: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaperWallet {
    pub fn new(initial_balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            balance: initial_balance,
            available: initial_balance,
            locked_margin: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            total_fees_paid: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reserve margin for a new position or pending limit order.
    pub fn lock_margin(&mut self, amount: Decimal) -> Result<(), TradingError> {
        if amount > self.available {
            return Err(TradingError::InsufficientMargin {
                required: amount,
                available: self.available,
            });
        }
        self.available -= amount;
        self.locked_margin += amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Free margin without settling PnL (cancelled/expired orders).
    pub fn release_margin(&mut self, amount: Decimal) {
        self.locked_margin -= amount;
        self.available += amount;
        self.updated_at = Utc::now();
    }

    /// Settle a close: move `pnl` into balance and free the position's margin
    /// in one step.
    pub fn realize_pnl(&mut self, pnl: Decimal, released_margin: Decimal) {
        self.realized_pnl += pnl;
        self.locked_margin -= released_margin;
        self.available += released_margin + pnl;
        self.balance += pnl;
        self.updated_at = Utc::now();
    }

    /// Trading fee comes straight out of equity.
    pub fn deduct_fee(&mut self, fee: Decimal) {
        self.available -= fee;
        self.balance -= fee;
        self.total_fees_paid += fee;
        self.updated_at = Utc::now();
    }

    /// Bookkeeping for a fee already netted out of a realized PnL figure.
    /// Adjusts the fee total only; balances were settled by `realize_pnl`.
    pub fn record_fee(&mut self, fee: Decimal) {
        self.total_fees_paid += fee;
        self.updated_at = Utc::now();
    }

    /// Signed funding payment. Positive = received, negative = paid. No margin
    /// is involved, so balance and available move together.
    pub fn apply_funding(&mut self, amount: Decimal) {
        self.balance += amount;
        self.available += amount;
        self.updated_at = Utc::now();
    }

    /// Total equity including open-position PnL.
    pub fn equity(&self) -> Decimal {
        self.balance + self.unrealized_pnl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn invariant_holds(w: &PaperWallet) -> bool {
        w.balance == w.available + w.locked_margin
    }

    #[test]
    fn lock_and_release() {
        let mut w = PaperWallet::new(dec!(10000));
        w.lock_margin(dec!(3000)).unwrap();
        assert_eq!(w.available, dec!(7000));
        assert_eq!(w.locked_margin, dec!(3000));
        assert!(invariant_holds(&w));

        w.release_margin(dec!(3000));
        assert_eq!(w.available, dec!(10000));
        assert_eq!(w.locked_margin, dec!(0));
        assert!(invariant_holds(&w));
    }

    #[test]
    fn lock_over_available_fails() {
        let mut w = PaperWallet::new(dec!(1000));
        let err = w.lock_margin(dec!(1001)).unwrap_err();
        assert!(matches!(err, TradingError::InsufficientMargin { .. }));
        // nothing moved
        assert_eq!(w.available, dec!(1000));
        assert_eq!(w.locked_margin, dec!(0));
    }

    #[test]
    fn realize_pnl_profit_and_loss() {
        let mut w = PaperWallet::new(dec!(10000));
        w.lock_margin(dec!(950)).unwrap();

        w.realize_pnl(dec!(500), dec!(950));
        assert_eq!(w.balance, dec!(10500));
        assert_eq!(w.available, dec!(10500));
        assert_eq!(w.realized_pnl, dec!(500));
        assert!(invariant_holds(&w));

        w.lock_margin(dec!(1000)).unwrap();
        w.realize_pnl(dec!(-200), dec!(1000));
        assert_eq!(w.balance, dec!(10300));
        assert_eq!(w.realized_pnl, dec!(300));
        assert!(invariant_holds(&w));
    }

    #[test]
    fn fee_reduces_equity() {
        let mut w = PaperWallet::new(dec!(10000));
        w.deduct_fee(dec!(4.75));
        assert_eq!(w.balance, dec!(9995.25));
        assert_eq!(w.available, dec!(9995.25));
        assert_eq!(w.total_fees_paid, dec!(4.75));
        assert!(invariant_holds(&w));
    }

    #[test]
    fn funding_moves_balance_and_available_together() {
        let mut w = PaperWallet::new(dec!(10000));
        w.apply_funding(dec!(-10));
        assert_eq!(w.balance, dec!(9990));
        assert_eq!(w.available, dec!(9990));
        w.apply_funding(dec!(25));
        assert_eq!(w.balance, dec!(10015));
        assert!(invariant_holds(&w));
    }
}

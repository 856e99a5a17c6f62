// 8.2: aggregate account summary returned by Engine::get_statistics.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingStatistics {
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    pub locked_margin: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub total_fees_paid: Decimal,
    pub open_positions: usize,
    pub closed_positions: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Percentage over closed positions. `None` with no closed history.
    pub win_rate: Option<Decimal>,
}

impl TradingStatistics {
    /// Human-facing win rate, "N/A" when there is nothing to rate.
    pub fn win_rate_display(&self) -> String {
        match self.win_rate {
            Some(rate) => format!("{:.1}%", rate),
            None => "N/A".to_string(),
        }
    }
}

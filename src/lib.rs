// paper-perps: simulated perpetual futures trading engine.
// paper fills against a real price feed: margin accounting, position netting,
// SL/TP and funding settlement, and liquidation, with no exchange round trip.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: Symbol, ids, Side, Leverage, lifecycle enums
//   2.x  error.rs: the trading error taxonomy with stable codes
//   3.x  order.rs: PaperOrder and its state machine
//   4.x  position.rs: PaperPosition, PnL, liquidation price, close math
//   5.x  funding.rs: 8-hour funding settlement, rate source, monitor
//   6.x  liquidation.rs: margin ratio, warnings, forced closes
//   8.x  engine/: core engine: orders, netting, closes, statistics
//   9.x  price_feed.rs: feed contract, TTL cache, mock feed
//   10.x sltp.rs: stop-loss / take-profit monitor
//        wallet.rs: balance / margin ledger
//        trade.rs: append-only trade records
//        persistence.rs: state blob + profile-keyed stores
//        session.rs: named engine registry for multi-user transports

// core trading modules
pub mod engine;
pub mod error;
pub mod order;
pub mod position;
pub mod trade;
pub mod types;
pub mod wallet;

// background monitors
pub mod funding;
pub mod liquidation;
pub mod sltp;

// integration modules
pub mod persistence;
pub mod price_feed;
pub mod session;

// re exports for convenience
pub use engine::{EngineConfig, PaperEngine, TradingStatistics};
pub use error::TradingError;
pub use funding::{
    calculate_funding_payment, funding_times_between, FundingMonitor, FundingMonitorState,
    FundingPayment, FundingRateSource, FundingStats, MockFundingRateSource,
};
pub use liquidation::{
    margin_status, LiquidationEngine, LiquidationEvent, LiquidationParams, MarginStatus,
};
pub use order::PaperOrder;
pub use persistence::{EngineState, FileStateStore, MemoryStateStore, StateStore};
pub use position::PaperPosition;
pub use price_feed::{AssetInfo, CachedPriceFeed, MockPriceFeed, PriceFeed, PriceSource};
pub use session::{SessionRegistry, SharedEngine};
pub use sltp::{SltpCheckReport, SltpMonitor};
pub use trade::TradeRecord;
pub use types::{
    round_to_step, CloseReason, Leverage, OrderId, OrderStatus, OrderType, PositionId,
    PositionStatus, Side, Symbol, TradeAction, TradeId,
};
pub use wallet::PaperWallet;

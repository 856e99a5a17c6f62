// 9.0: price feed boundary. the engine is agnostic to where quotes come from:
// a REST-backed source behind the TTL cache, or the in-memory mock for tests
// and demos. both sides of the contract return the same errors so the engine
// never special-cases its feed.

use crate::error::TradingError;
use crate::types::{Leverage, Symbol};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Per-symbol trading constraints, served alongside prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetInfo {
    pub symbol: Symbol,
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    pub quantity_step: Decimal,
    pub min_leverage: u32,
    pub max_leverage: u32,
    pub price_step: Decimal,
}

impl AssetInfo {
    /// Permissive defaults matching common USDT-perp listings.
    pub fn defaults(symbol: Symbol) -> Self {
        Self {
            symbol,
            min_quantity: dec!(0.001),
            max_quantity: dec!(1000000),
            quantity_step: dec!(0.001),
            min_leverage: 1,
            max_leverage: 100,
            price_step: dec!(0.01),
        }
    }
}

/// What the engine needs from any quote provider.
pub trait PriceFeed: Send + Sync {
    /// Current price. `SymbolNotFound` for unknown instruments,
    /// `PriceFetch` for transient upstream failures.
    fn get_price(&self, symbol: &Symbol) -> Result<Decimal, TradingError>;

    fn get_asset_info(&self, symbol: &Symbol) -> Result<AssetInfo, TradingError>;

    /// One price per symbol; symbols that fail to resolve are skipped.
    fn get_prices_batch(&self, symbols: &[Symbol]) -> HashMap<Symbol, Decimal> {
        let mut prices = HashMap::new();
        for symbol in symbols {
            match self.get_price(symbol) {
                Ok(price) => {
                    prices.insert(symbol.clone(), price);
                }
                Err(err) => {
                    warn!(%symbol, %err, "price fetch failed, skipping symbol this tick");
                }
            }
        }
        prices
    }

    fn is_valid_symbol(&self, symbol: &Symbol) -> bool {
        self.get_asset_info(symbol).is_ok()
    }

    fn validate_quantity(&self, symbol: &Symbol, quantity: Decimal) -> Result<(), TradingError> {
        let info = self.get_asset_info(symbol)?;
        if quantity < info.min_quantity {
            return Err(TradingError::invalid_order(
                "quantity",
                quantity,
                format!("below minimum {}", info.min_quantity),
            ));
        }
        if quantity > info.max_quantity {
            return Err(TradingError::invalid_order(
                "quantity",
                quantity,
                format!("exceeds maximum {}", info.max_quantity),
            ));
        }
        Ok(())
    }

    fn validate_leverage(&self, symbol: &Symbol, leverage: Leverage) -> Result<(), TradingError> {
        let info = self.get_asset_info(symbol)?;
        if leverage.value() < info.min_leverage {
            return Err(TradingError::invalid_order(
                "leverage",
                leverage,
                format!("below minimum {}x", info.min_leverage),
            ));
        }
        if leverage.value() > info.max_leverage {
            return Err(TradingError::invalid_order(
                "leverage",
                leverage,
                format!("exceeds maximum {}x", info.max_leverage),
            ));
        }
        Ok(())
    }
}

// 9.1: upstream quote boundary for the live feed. a REST client implements
// this one method; everything else (caching, validation) lives here.
pub trait PriceSource: Send + Sync {
    fn fetch_asset(&self, symbol: &Symbol) -> Result<(Decimal, AssetInfo), TradingError>;
}

struct CacheSlot<T> {
    value: T,
    fetched_at: Instant,
}

/// TTL-caching feed over any [`PriceSource`]. Prices cache for seconds, asset
/// metadata for minutes, bounding call volume against the upstream source.
pub struct CachedPriceFeed<S: PriceSource> {
    source: S,
    price_ttl: Duration,
    asset_ttl: Duration,
    price_cache: Mutex<HashMap<Symbol, CacheSlot<Decimal>>>,
    asset_cache: Mutex<HashMap<Symbol, CacheSlot<AssetInfo>>>,
}

impl<S: PriceSource> CachedPriceFeed<S> {
    pub fn new(source: S) -> Self {
        Self::with_ttls(source, Duration::from_secs(3), Duration::from_secs(300))
    }

    pub fn with_ttls(source: S, price_ttl: Duration, asset_ttl: Duration) -> Self {
        Self {
            source,
            price_ttl,
            asset_ttl,
            price_cache: Mutex::new(HashMap::new()),
            asset_cache: Mutex::new(HashMap::new()),
        }
    }

    fn fetch_and_fill(&self, symbol: &Symbol) -> Result<(Decimal, AssetInfo), TradingError> {
        let (price, info) = self.source.fetch_asset(symbol)?;
        let now = Instant::now();
        self.price_cache.lock().unwrap().insert(
            symbol.clone(),
            CacheSlot { value: price, fetched_at: now },
        );
        self.asset_cache.lock().unwrap().insert(
            symbol.clone(),
            CacheSlot { value: info.clone(), fetched_at: now },
        );
        Ok((price, info))
    }

    pub fn clear_cache(&self) {
        self.price_cache.lock().unwrap().clear();
        self.asset_cache.lock().unwrap().clear();
    }

    pub fn cache_sizes(&self) -> (usize, usize) {
        (
            self.price_cache.lock().unwrap().len(),
            self.asset_cache.lock().unwrap().len(),
        )
    }
}

impl<S: PriceSource> PriceFeed for CachedPriceFeed<S> {
    fn get_price(&self, symbol: &Symbol) -> Result<Decimal, TradingError> {
        {
            let cache = self.price_cache.lock().unwrap();
            if let Some(slot) = cache.get(symbol) {
                if slot.fetched_at.elapsed() < self.price_ttl {
                    debug!(%symbol, price = %slot.value, "price cache hit");
                    return Ok(slot.value);
                }
            }
        }
        self.fetch_and_fill(symbol).map(|(price, _)| price)
    }

    fn get_asset_info(&self, symbol: &Symbol) -> Result<AssetInfo, TradingError> {
        {
            let cache = self.asset_cache.lock().unwrap();
            if let Some(slot) = cache.get(symbol) {
                if slot.fetched_at.elapsed() < self.asset_ttl {
                    return Ok(slot.value.clone());
                }
            }
        }
        self.fetch_and_fill(symbol).map(|(_, info)| info)
    }
}

// 9.2: in-memory feed for tests and demos. prices are settable at any time,
// so a test can move the market between ticks.
pub struct MockPriceFeed {
    prices: Mutex<HashMap<Symbol, Decimal>>,
    assets: Mutex<HashMap<Symbol, AssetInfo>>,
}

impl MockPriceFeed {
    pub fn new() -> Self {
        Self {
            prices: Mutex::new(HashMap::new()),
            assets: Mutex::new(HashMap::new()),
        }
    }

    /// The usual demo universe.
    pub fn with_default_markets() -> Self {
        let feed = Self::new();
        feed.set_price(Symbol::from("BTCUSDT"), dec!(100000));
        feed.set_price(Symbol::from("ETHUSDT"), dec!(3500));
        feed.set_price(Symbol::from("XRPUSDT"), dec!(2.50));
        feed.set_price(Symbol::from("SOLUSDT"), dec!(200));
        feed.set_price(Symbol::from("DOGEUSDT"), dec!(0.35));
        feed
    }

    /// Insert or move a price. Registers the symbol with default constraints
    /// if it is new.
    pub fn set_price(&self, symbol: Symbol, price: Decimal) {
        self.assets
            .lock()
            .unwrap()
            .entry(symbol.clone())
            .or_insert_with(|| AssetInfo::defaults(symbol.clone()));
        self.prices.lock().unwrap().insert(symbol, price);
    }

    /// Override constraints for a symbol (e.g. a coarse quantity step).
    pub fn set_asset_info(&self, info: AssetInfo) {
        self.assets.lock().unwrap().insert(info.symbol.clone(), info);
    }

    pub fn remove_symbol(&self, symbol: &Symbol) {
        self.prices.lock().unwrap().remove(symbol);
        self.assets.lock().unwrap().remove(symbol);
    }
}

impl Default for MockPriceFeed {
    fn default() -> Self {
        Self::with_default_markets()
    }
}

impl PriceFeed for MockPriceFeed {
    fn get_price(&self, symbol: &Symbol) -> Result<Decimal, TradingError> {
        self.prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| TradingError::SymbolNotFound(symbol.clone()))
    }

    fn get_asset_info(&self, symbol: &Symbol) -> Result<AssetInfo, TradingError> {
        self.assets
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| TradingError::SymbolNotFound(symbol.clone()))
    }
}

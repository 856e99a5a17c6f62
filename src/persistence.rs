//! State export/import and the profile-keyed state store.
//!
//! The engine serializes to one JSON-friendly blob (Decimals as strings,
//! datetimes ISO-8601) and reconstructs from it given the same price-feed
//! wiring. Where the blob lands is a collaborator concern: a file per
//! profile, a database row, or memory all satisfy the same trait.

use crate::engine::PaperEngine;
use crate::error::TradingError;
use crate::order::PaperOrder;
use crate::position::PaperPosition;
use crate::price_feed::PriceFeed;
use crate::trade::TradeRecord;
use crate::types::{Leverage, OrderId, PositionId, Symbol};
use crate::wallet::PaperWallet;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Complete serializable engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub wallet: PaperWallet,
    pub orders: HashMap<String, PaperOrder>,
    pub positions: HashMap<String, PaperPosition>,
    pub trade_history: Vec<TradeRecord>,
    pub pending_orders: HashMap<String, Vec<String>>,
    pub leverage_settings: HashMap<String, u32>,
    pub exported_at: DateTime<Utc>,
}

impl PaperEngine {
    pub fn export_state(&self) -> EngineState {
        EngineState {
            wallet: self.wallet.clone(),
            orders: self
                .orders
                .iter()
                .map(|(id, o)| (id.0.clone(), o.clone()))
                .collect(),
            positions: self
                .positions
                .iter()
                .map(|(id, p)| (id.0.clone(), p.clone()))
                .collect(),
            trade_history: self.trade_history.clone(),
            pending_orders: self
                .pending_orders
                .iter()
                .map(|(s, ids)| (s.0.clone(), ids.iter().map(|id| id.0.clone()).collect()))
                .collect(),
            leverage_settings: self
                .leverage_settings
                .iter()
                .map(|(s, l)| (s.0.clone(), l.value()))
                .collect(),
            exported_at: Utc::now(),
        }
    }

    pub fn import_state(&mut self, state: EngineState) {
        self.wallet = state.wallet;
        self.orders = state
            .orders
            .into_iter()
            .map(|(id, o)| (OrderId(id), o))
            .collect();
        self.positions = state
            .positions
            .into_iter()
            .map(|(id, p)| (PositionId(id), p))
            .collect();
        self.trade_history = state.trade_history;
        self.pending_orders = state
            .pending_orders
            .into_iter()
            .map(|(s, ids)| (Symbol(s), ids.into_iter().map(OrderId).collect()))
            .collect();
        self.leverage_settings = state
            .leverage_settings
            .into_iter()
            .filter_map(|(s, l)| Leverage::new(l).map(|lev| (Symbol(s), lev)))
            .collect();

        info!(
            positions = self.positions.len(),
            orders = self.orders.len(),
            "engine state imported"
        );
    }

    /// Reconstruct an engine identical to the exporting one, wired to `feed`.
    pub fn from_state(state: EngineState, feed: Arc<dyn PriceFeed>) -> Self {
        let mut engine = PaperEngine::new(Decimal::ZERO, feed);
        engine.import_state(state);
        engine
    }
}

/// Durable store for engine state, keyed by profile name.
pub trait StateStore: Send + Sync {
    fn save(&self, profile: &str, state: &EngineState) -> Result<(), TradingError>;
    fn load(&self, profile: &str) -> Result<Option<EngineState>, TradingError>;
    fn delete(&self, profile: &str) -> Result<(), TradingError>;
    fn profiles(&self) -> Result<Vec<String>, TradingError>;
}

fn store_error(reason: impl ToString) -> TradingError {
    TradingError::Persistence {
        reason: reason.to_string(),
    }
}

/// One pretty-printed JSON file per profile under a directory.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, TradingError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(store_error)?;
        Ok(Self { dir })
    }

    fn path_for(&self, profile: &str) -> PathBuf {
        self.dir.join(format!("{profile}.json"))
    }
}

impl StateStore for FileStateStore {
    fn save(&self, profile: &str, state: &EngineState) -> Result<(), TradingError> {
        let json = serde_json::to_string_pretty(state).map_err(store_error)?;
        std::fs::write(self.path_for(profile), json).map_err(store_error)?;
        info!(%profile, "engine state saved");
        Ok(())
    }

    fn load(&self, profile: &str) -> Result<Option<EngineState>, TradingError> {
        let path = self.path_for(profile);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path).map_err(store_error)?;
        let state = serde_json::from_str(&json).map_err(store_error)?;
        Ok(Some(state))
    }

    fn delete(&self, profile: &str) -> Result<(), TradingError> {
        let path = self.path_for(profile);
        if path.exists() {
            std::fs::remove_file(path).map_err(store_error)?;
        }
        Ok(())
    }

    fn profiles(&self) -> Result<Vec<String>, TradingError> {
        let mut profiles = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(store_error)? {
            let path = entry.map_err(store_error)?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    profiles.push(stem.to_string());
                }
            }
        }
        profiles.sort();
        Ok(profiles)
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, EngineState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn save(&self, profile: &str, state: &EngineState) -> Result<(), TradingError> {
        self.states
            .lock()
            .unwrap()
            .insert(profile.to_string(), state.clone());
        Ok(())
    }

    fn load(&self, profile: &str) -> Result<Option<EngineState>, TradingError> {
        Ok(self.states.lock().unwrap().get(profile).cloned())
    }

    fn delete(&self, profile: &str) -> Result<(), TradingError> {
        self.states.lock().unwrap().remove(profile);
        Ok(())
    }

    fn profiles(&self) -> Result<Vec<String>, TradingError> {
        let mut profiles: Vec<_> = self.states.lock().unwrap().keys().cloned().collect();
        profiles.sort();
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price_feed::MockPriceFeed;
    use rust_decimal_macros::dec;

    fn engine_with_position() -> PaperEngine {
        let feed = Arc::new(MockPriceFeed::with_default_markets());
        let mut engine = PaperEngine::new(dec!(10000), feed);
        engine
            .create_market_order(
                Symbol::from("BTCUSDT"),
                crate::types::Side::Long,
                dec!(0.1),
                Leverage::new(10).unwrap(),
                None,
                None,
                false,
            )
            .unwrap();
        engine
    }

    #[test]
    fn export_import_round_trip() {
        let mut engine = engine_with_position();
        let state = engine.export_state();

        let feed = Arc::new(MockPriceFeed::with_default_markets());
        let restored = PaperEngine::from_state(state, feed);

        assert_eq!(restored.wallet().balance, engine.wallet().balance);
        assert_eq!(restored.wallet().locked_margin, engine.wallet().locked_margin);
        assert_eq!(restored.export_state().positions.len(), 1);
        assert_eq!(restored.export_state().trade_history.len(), 1);
    }

    #[test]
    fn state_blob_is_json_with_string_decimals() {
        let engine = engine_with_position();
        let json = serde_json::to_value(engine.export_state()).unwrap();
        // decimals serialize as strings, timestamps as ISO-8601
        assert!(json["wallet"]["balance"].is_string());
        assert!(json["wallet"]["created_at"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn memory_store_round_trip() {
        let engine = engine_with_position();
        let store = MemoryStateStore::new();

        store.save("default", &engine.export_state()).unwrap();
        assert_eq!(store.profiles().unwrap(), vec!["default"]);
        assert!(store.load("default").unwrap().is_some());
        assert!(store.load("other").unwrap().is_none());

        store.delete("default").unwrap();
        assert!(store.load("default").unwrap().is_none());
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).unwrap();
        let engine = engine_with_position();

        store.save("alpha", &engine.export_state()).unwrap();
        store.save("beta", &engine.export_state()).unwrap();
        assert_eq!(store.profiles().unwrap(), vec!["alpha", "beta"]);

        let loaded = store.load("alpha").unwrap().unwrap();
        assert_eq!(loaded.positions.len(), 1);

        store.delete("alpha").unwrap();
        assert_eq!(store.profiles().unwrap(), vec!["beta"]);
    }
}

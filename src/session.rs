//! Session registry: named engine instances behind one collaborator.
//!
//! Transports that serve multiple users (HTTP, MCP) hold one of these instead
//! of a process-global map. Each session owns an isolated engine; there is no
//! cross-engine sharing.

use crate::engine::PaperEngine;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type SharedEngine = Arc<Mutex<PaperEngine>>;

#[derive(Default)]
pub struct SessionRegistry {
    engines: Mutex<HashMap<String, SharedEngine>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing engine for `profile`, or the one built by `factory`.
    pub fn get_or_create<F>(&self, profile: &str, factory: F) -> SharedEngine
    where
        F: FnOnce() -> PaperEngine,
    {
        let mut engines = self.engines.lock().unwrap();
        engines
            .entry(profile.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(factory())))
            .clone()
    }

    pub fn get(&self, profile: &str) -> Option<SharedEngine> {
        self.engines.lock().unwrap().get(profile).cloned()
    }

    pub fn remove(&self, profile: &str) -> Option<SharedEngine> {
        self.engines.lock().unwrap().remove(profile)
    }

    pub fn profiles(&self) -> Vec<String> {
        let mut profiles: Vec<_> = self.engines.lock().unwrap().keys().cloned().collect();
        profiles.sort();
        profiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price_feed::MockPriceFeed;
    use rust_decimal_macros::dec;

    fn make_engine() -> PaperEngine {
        PaperEngine::new(dec!(10000), Arc::new(MockPriceFeed::with_default_markets()))
    }

    #[test]
    fn sessions_are_isolated_and_reused() {
        let registry = SessionRegistry::new();

        let a = registry.get_or_create("alice", make_engine);
        let b = registry.get_or_create("bob", make_engine);
        let a_again = registry.get_or_create("alice", make_engine);

        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.profiles(), vec!["alice", "bob"]);

        registry.remove("bob");
        assert!(registry.get("bob").is_none());
    }
}

//! Name-keyed strategy registry, built once at startup.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{BuyAndHold, MaCrossover, Momentum, RsiThreshold, Strategy};
use crate::error::ConfigError;

/// Strategies by registry id. Iteration is alphabetical.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in strategy.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BuyAndHold));
        registry.register(Arc::new(MaCrossover));
        registry.register(Arc::new(RsiThreshold));
        registry.register(Arc::new(Momentum));
        registry
    }

    /// Add a strategy under its own name, returning the one it replaced.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) -> Option<Arc<dyn Strategy>> {
        self.strategies.insert(strategy.name().to_string(), strategy)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Strategy>, ConfigError> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownStrategy(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Strategy>> {
        self.strategies.values()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}

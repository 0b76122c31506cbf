//! Named collection of breakers, one per protected dependency.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::breaker::CircuitBreaker;
use crate::config::BreakerConfig;
use crate::error::ConfigError;
use crate::stats::Stats;

/// Caller-owned registry mapping dependency names to breakers.
///
/// Registries are plain values: tests and independent subsystems can each
/// build their own.
#[derive(Default)]
pub struct MetricsRegistry {
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `breaker` with `name`. Last write wins; the breaker that was
    /// replaced, if any, is returned.
    pub fn register(
        &self,
        name: impl Into<String>,
        breaker: CircuitBreaker,
    ) -> Option<CircuitBreaker> {
        let name = name.into();
        let previous = self
            .breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), breaker);
        if previous.is_some() {
            tracing::debug!(breaker = %name, "replaced registered circuit breaker");
        }
        previous
    }

    /// Return the breaker for `name`, creating and registering one from
    /// `config` if none exists yet.
    pub fn get_or_register(
        &self,
        name: &str,
        config: BreakerConfig,
    ) -> Result<CircuitBreaker, ConfigError> {
        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = breakers.get(name) {
            return Ok(existing.clone());
        }
        let breaker = CircuitBreaker::named(name, config)?;
        breakers.insert(name.to_string(), breaker.clone());
        Ok(breaker)
    }

    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.read().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One snapshot per registered breaker. Each snapshot is consistent on
    /// its own; they are not taken atomically across breakers.
    pub fn all_stats(&self) -> HashMap<String, Stats> {
        self.read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.stats()))
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("breakers", &self.names())
            .finish()
    }
}

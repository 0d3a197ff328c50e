//! Name-keyed store of circuit breakers
//!
//! Every logical downstream dependency gets exactly one breaker, created
//! lazily on first lookup and shared by every call site using that name.
//! The registry is an explicit value; wrap it in an `Arc` to share it.

use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
use crate::error::ResilienceError;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Health of a single breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerHealth {
    pub name: String,
    /// False only while the breaker is open
    pub healthy: bool,
    pub state: CircuitState,
    pub stats: CircuitBreakerStats,
}

/// Aggregate view for a status endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    /// True when no breaker is open
    pub healthy: bool,
    pub total: usize,
    pub open: usize,
    pub breakers: Vec<BreakerHealth>,
}

impl HealthSummary {
    pub fn from_report(breakers: Vec<BreakerHealth>) -> Self {
        let open = breakers.iter().filter(|b| !b.healthy).count();
        Self {
            healthy: open == 0,
            total: breakers.len(),
            open,
            breakers,
        }
    }
}

/// Registry of named circuit breakers sharing a default configuration
pub struct CircuitBreakerRegistry<T, E> {
    breakers: RwLock<HashMap<String, CircuitBreaker<T, E>>>,
    default_config: CircuitBreakerConfig<T, E>,
}

impl<T: 'static, E: 'static> Default for CircuitBreakerRegistry<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for CircuitBreakerRegistry<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.names())
            .field("default_config", &self.default_config)
            .finish()
    }
}

impl<T: 'static, E: 'static> CircuitBreakerRegistry<T, E> {
    /// Create a new empty registry using the stock breaker defaults
    pub fn new() -> Self {
        Self::with_defaults(CircuitBreakerConfig::default())
    }
}

impl<T, E> CircuitBreakerRegistry<T, E> {
    /// Create a new empty registry; breakers created without explicit
    /// options start from `default_config`
    pub fn with_defaults(default_config: CircuitBreakerConfig<T, E>) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CircuitBreaker<T, E>>> {
        self.breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CircuitBreaker<T, E>>> {
        self.breakers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get the breaker for `name`, creating it on first access
    ///
    /// `config` is only consulted when the breaker does not exist yet; later
    /// calls return the existing instance and ignore it. The breaker is
    /// always named `name`, whatever the config says.
    pub fn get(&self, name: &str, config: Option<CircuitBreakerConfig<T, E>>) -> CircuitBreaker<T, E> {
        if let Some(breaker) = self.read().get(name) {
            return breaker.clone();
        }

        let mut breakers = self.write();
        // Double-check after acquiring write lock
        if let Some(breaker) = breakers.get(name) {
            return breaker.clone();
        }

        let mut config = config.unwrap_or_else(|| self.default_config.clone());
        config.name = name.to_string();
        let breaker = CircuitBreaker::new(config);
        breakers.insert(name.to_string(), breaker.clone());
        tracing::debug!(breaker = %name, "registered circuit breaker");
        breaker
    }

    /// Like [`get`](Self::get), but rejects an invalid `config` instead of
    /// registering a breaker with it
    pub fn try_get(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig<T, E>>,
    ) -> Result<CircuitBreaker<T, E>, ResilienceError> {
        if let Some(config) = &config {
            if !self.has(name) {
                let mut named = config.clone();
                named.name = name.to_string();
                named.validate()?;
            }
        }
        Ok(self.get(name, config))
    }

    /// Existing breaker for `name`, without creating one
    pub fn lookup(&self, name: &str) -> Option<CircuitBreaker<T, E>> {
        self.read().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Reset and forget the breaker for `name`
    ///
    /// Handles held elsewhere keep working but are detached: the next
    /// [`get`](Self::get) creates a fresh breaker.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.write().remove(name);
        match removed {
            Some(breaker) => {
                breaker.reset();
                tracing::debug!(breaker = %name, "removed circuit breaker");
                true
            }
            None => false,
        }
    }

    /// Snapshot of every breaker, ordered by name
    pub fn all_stats(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.stats()))
            .collect()
    }

    pub fn reset_all(&self) {
        for breaker in self.read().values() {
            breaker.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Per-breaker health, ordered by name
    pub fn health_report(&self) -> Vec<BreakerHealth> {
        self.all_stats()
            .into_iter()
            .map(|(name, stats)| BreakerHealth {
                name,
                healthy: stats.state != CircuitState::Open,
                state: stats.state,
                stats,
            })
            .collect()
    }

    pub fn health_summary(&self) -> HealthSummary {
        HealthSummary::from_report(self.health_report())
    }
}

//! Circuit breaker registry.

use crate::breaker::{BreakerState, CircuitBreaker};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// One circuit breaker per backend URL, created on first use.
///
/// Lookups take the read lock; a miss upgrades to the write lock and
/// re-checks before inserting, so exactly one breaker ever exists per
/// URL for the process lifetime.
pub struct Registry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl Registry {
    /// Create an empty registry; all breakers share the given settings.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            failure_threshold,
            reset_timeout,
        }
    }

    /// Get the breaker for a backend URL, creating it if absent.
    pub fn get(&self, backend_url: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self
                .breakers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(cb) = breakers.get(backend_url) {
                return Arc::clone(cb);
            }
        }

        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        // Another caller may have inserted while we waited for the
        // write lock.
        if let Some(cb) = breakers.get(backend_url) {
            return Arc::clone(cb);
        }

        let cb = Arc::new(CircuitBreaker::new(
            self.failure_threshold,
            self.reset_timeout,
        ));
        breakers.insert(backend_url.to_string(), Arc::clone(&cb));
        cb
    }

    /// Drop every breaker.
    pub fn reset(&self) {
        self.breakers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Snapshot of URL -> breaker state, for diagnostics.
    pub fn stats(&self) -> HashMap<String, BreakerState> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(url, cb)| (url.clone(), cb.state()))
            .collect()
    }
}

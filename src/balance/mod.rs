//! Backend selection coordination.

pub mod strategy;

pub use strategy::Strategy;

use crate::backend::Backend;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Errors from backend selection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no healthy backends")]
    NoHealthyBackend,

    #[error("strategy returned no backend")]
    StrategyReturnedNone,
}

/// Coordinates backend selection using one configured strategy.
///
/// Filtering to healthy backends, the strategy decision, and the
/// connection-slot reservation all happen under one critical section,
/// so concurrent callers observe select-and-reserve as a single step.
pub struct LoadBalancer {
    strategy: Strategy,
    select_lock: Mutex<()>,
}

impl LoadBalancer {
    /// Create a new load balancer with the given strategy.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            select_lock: Mutex::new(()),
        }
    }

    /// The configured strategy.
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Select a healthy backend and reserve a connection slot on it.
    ///
    /// Backends in `excluded` (keyed by URL) are skipped; the caller
    /// uses this to avoid retrying a backend it already attempted.
    pub fn select_and_reserve(
        &self,
        backends: &[Arc<Backend>],
        excluded: &HashSet<String>,
    ) -> Result<Arc<Backend>, SelectError> {
        self.reserve(backends, excluded, None)
    }

    /// Like [`select_and_reserve`](Self::select_and_reserve) but feeds a
    /// selection key to strategies that hash by key. The key is applied
    /// and the backend chosen under the same lock.
    pub fn select_and_reserve_with_key(
        &self,
        backends: &[Arc<Backend>],
        excluded: &HashSet<String>,
        key: &str,
    ) -> Result<Arc<Backend>, SelectError> {
        self.reserve(backends, excluded, Some(key))
    }

    fn reserve(
        &self,
        backends: &[Arc<Backend>],
        excluded: &HashSet<String>,
        key: Option<&str>,
    ) -> Result<Arc<Backend>, SelectError> {
        let _guard = self
            .select_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let candidates: Vec<Arc<Backend>> = backends
            .iter()
            .filter(|b| b.is_healthy() && !excluded.contains(b.url_str()))
            .map(Arc::clone)
            .collect();

        if candidates.is_empty() {
            return Err(SelectError::NoHealthyBackend);
        }

        if let Some(key) = key {
            self.strategy.set_key(key);
        }

        let chosen = self
            .strategy
            .select(&candidates)
            .ok_or(SelectError::StrategyReturnedNone)?;

        debug_assert!(
            candidates.iter().any(|b| b.url_str() == chosen.url_str()),
            "strategy returned a backend outside the candidate set"
        );

        // Reserve before releasing the lock so that concurrent callers
        // of connection-sensitive strategies see the slot taken.
        chosen.increment_conn();
        Ok(chosen)
    }
}

//! Round-robin selection.

use crate::backend::Backend;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Distributes selections evenly across candidates in input order.
pub struct RoundRobin {
    counter: AtomicU64,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    pub fn select(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if candidates.is_empty() {
            return None;
        }

        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let index = (n % candidates.len() as u64) as usize;
        Some(Arc::clone(&candidates[index]))
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

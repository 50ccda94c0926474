//! Uniform random selection.

use crate::backend::Backend;
use rand::Rng;
use std::sync::Arc;

/// Picks a candidate uniformly at random.
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }

    pub fn select(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if candidates.is_empty() {
            return None;
        }

        let index = rand::thread_rng().gen_range(0..candidates.len());
        Some(Arc::clone(&candidates[index]))
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::new()
    }
}

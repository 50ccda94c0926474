//! Least-response-time selection.

use crate::backend::Backend;
use std::sync::Arc;
use std::time::Duration;

/// Picks the candidate with the lowest load-adjusted response time.
///
/// A candidate with no recorded sample yet is preferred outright, so
/// cold backends get traffic before the averages settle. Otherwise the
/// score is `ewma * (active_connections + 1)` and the lowest score in
/// input order wins.
pub struct LeastResponse;

impl LeastResponse {
    pub fn new() -> Self {
        Self
    }

    pub fn select(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let mut best: Option<&Arc<Backend>> = None;
        let mut best_score = Duration::MAX;

        for candidate in candidates {
            let ewma = candidate.ewma_response();

            if ewma.is_zero() {
                return Some(Arc::clone(candidate));
            }

            let score = ewma * (candidate.active_connections() + 1);

            match best {
                None => {
                    best = Some(candidate);
                    best_score = score;
                }
                Some(_) if score < best_score => {
                    best = Some(candidate);
                    best_score = score;
                }
                Some(_) => {}
            }
        }

        best.map(Arc::clone)
    }
}

impl Default for LeastResponse {
    fn default() -> Self {
        Self::new()
    }
}

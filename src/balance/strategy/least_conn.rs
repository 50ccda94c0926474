//! Least-connections selection.

use crate::backend::Backend;
use std::sync::Arc;

/// Picks the candidate with the fewest active connections.
///
/// Ties go to the earliest candidate in input order (strict `<`).
pub struct LeastConn;

impl LeastConn {
    pub fn new() -> Self {
        Self
    }

    pub fn select(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let mut best: Option<&Arc<Backend>> = None;
        let mut best_conns = u32::MAX;

        for candidate in candidates {
            let conns = candidate.active_connections();
            if conns < best_conns {
                best_conns = conns;
                best = Some(candidate);
            }
        }

        best.map(Arc::clone)
    }
}

impl Default for LeastConn {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::strategy::test_support::test_backends;

    #[test]
    fn test_selects_fewest_connections() {
        let lc = LeastConn::new();
        let backends = test_backends(3);

        backends[0].increment_conn();
        backends[0].increment_conn();
        backends[1].increment_conn();

        let selected = lc.select(&backends).unwrap();
        assert_eq!(selected.url_str(), backends[2].url_str());
    }

    #[test]
    fn test_tie_goes_to_first() {
        let lc = LeastConn::new();
        let backends = test_backends(3);

        let selected = lc.select(&backends).unwrap();
        assert_eq!(selected.url_str(), backends[0].url_str());
    }

    #[test]
    fn test_empty_candidates() {
        let lc = LeastConn::new();
        assert!(lc.select(&[]).is_none());
    }
}

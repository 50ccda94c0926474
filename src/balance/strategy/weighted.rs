//! Smooth weighted round-robin selection.

use crate::backend::Backend;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Nginx-style smooth weighted round-robin.
///
/// Each candidate carries a running current weight. On every selection
/// the candidate's configured weight is added to its current, the
/// highest current wins, and the winner's current is reduced by the sum
/// of all weights. This interleaves picks proportionally instead of
/// bursting each backend `weight` times in a row.
pub struct WeightedRoundRobin {
    /// Running current weights, keyed by backend URL. Entries for
    /// backends absent from the candidate set are pruned each call.
    current: Mutex<HashMap<String, i64>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(HashMap::new()),
        }
    }

    pub fn select(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if candidates.is_empty() {
            return None;
        }

        let mut current = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        current.retain(|url, _| candidates.iter().any(|b| b.url_str() == url));

        let total: i64 = candidates
            .iter()
            .filter(|b| b.weight() > 0)
            .map(|b| i64::from(b.weight()))
            .sum();
        if total == 0 {
            return None;
        }

        let mut best: Option<&Arc<Backend>> = None;
        let mut best_current = i64::MIN;

        for candidate in candidates {
            let weight = i64::from(candidate.weight());
            if weight <= 0 {
                continue;
            }

            let entry = current.entry(candidate.url_str().to_string()).or_insert(0);
            *entry += weight;

            if *entry > best_current {
                best_current = *entry;
                best = Some(candidate);
            }
        }

        let chosen = best?;
        if let Some(entry) = current.get_mut(chosen.url_str()) {
            *entry -= total;
        }

        Some(Arc::clone(chosen))
    }
}

impl Default for WeightedRoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weighted_backends(weights: &[u32]) -> Vec<Arc<Backend>> {
        weights
            .iter()
            .enumerate()
            .map(|(i, &w)| {
                let backend = Backend::new(
                    format!("http://127.0.0.1:{}", 9001 + i).parse().unwrap(),
                    w,
                );
                backend.set_healthy(true);
                Arc::new(backend)
            })
            .collect()
    }

    fn count_selections(
        wrr: &WeightedRoundRobin,
        backends: &[Arc<Backend>],
        rounds: usize,
    ) -> Vec<usize> {
        let mut counts = vec![0usize; backends.len()];
        for _ in 0..rounds {
            let selected = wrr.select(backends).unwrap();
            let idx = backends
                .iter()
                .position(|b| b.url_str() == selected.url_str())
                .unwrap();
            counts[idx] += 1;
        }
        counts
    }

    #[test]
    fn test_exact_proportionality() {
        let wrr = WeightedRoundRobin::new();
        let backends = weighted_backends(&[5, 1, 1]);

        // Over a multiple of the weight sum, counts match weights exactly.
        let counts = count_selections(&wrr, &backends, 7 * 10);
        assert_eq!(counts, vec![50, 10, 10]);
    }

    #[test]
    fn test_smooth_interleaving() {
        let wrr = WeightedRoundRobin::new();
        let backends = weighted_backends(&[2, 1]);

        // Smooth WRR with weights 2:1 starts a, b, a rather than a, a, b.
        let first = wrr.select(&backends).unwrap();
        let second = wrr.select(&backends).unwrap();
        let third = wrr.select(&backends).unwrap();

        assert_eq!(first.url_str(), backends[0].url_str());
        assert_eq!(second.url_str(), backends[1].url_str());
        assert_eq!(third.url_str(), backends[0].url_str());
    }

    #[test]
    fn test_zero_weights_skipped() {
        let wrr = WeightedRoundRobin::new();
        let backends = weighted_backends(&[0, 3]);

        for _ in 0..10 {
            let selected = wrr.select(&backends).unwrap();
            assert_eq!(selected.url_str(), backends[1].url_str());
        }
    }

    #[test]
    fn test_all_zero_weights() {
        let wrr = WeightedRoundRobin::new();
        let backends = weighted_backends(&[0, 0]);
        assert!(wrr.select(&backends).is_none());
    }

    #[test]
    fn test_prunes_removed_backends() {
        let wrr = WeightedRoundRobin::new();
        let backends = weighted_backends(&[1, 1, 1]);

        for _ in 0..5 {
            wrr.select(&backends).unwrap();
        }

        // Selecting from a narrowed set drops state for the rest.
        let narrowed = backends[..1].to_vec();
        wrr.select(&narrowed).unwrap();

        let current = wrr.current.lock().unwrap();
        assert_eq!(current.len(), 1);
        assert!(current.contains_key(backends[0].url_str()));
    }

    #[test]
    fn test_empty_candidates() {
        let wrr = WeightedRoundRobin::new();
        assert!(wrr.select(&[]).is_none());
    }
}

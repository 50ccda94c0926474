//! Load balancing strategies.

mod consistent_hash;
mod least_conn;
mod least_response;
mod random;
mod round_robin;
mod weighted;

pub use consistent_hash::ConsistentHash;
pub use least_conn::LeastConn;
pub use least_response::LeastResponse;
pub use random::Random;
pub use round_robin::RoundRobin;
pub use weighted::WeightedRoundRobin;

use crate::backend::Backend;
use crate::config::StrategyConfig;
use std::sync::Arc;
use tracing::warn;

/// A backend selection policy.
///
/// `select` receives candidates already filtered to healthy,
/// non-excluded backends by the coordinator and may return `None` only
/// when the slice is empty or no candidate has positive weight.
/// `set_key` feeds the per-request key to the consistent-hash variant
/// and is a no-op for every other policy.
pub enum Strategy {
    RoundRobin(RoundRobin),
    Random(Random),
    LeastConn(LeastConn),
    LeastResponse(LeastResponse),
    WeightedRoundRobin(WeightedRoundRobin),
    ConsistentHash(ConsistentHash),
}

impl Strategy {
    /// Resolve a strategy from configuration.
    ///
    /// Unknown names fall back to round-robin with a warning.
    pub fn from_config(config: &StrategyConfig) -> Self {
        match config.strategy_type.as_str() {
            "round-robin" => Strategy::RoundRobin(RoundRobin::new()),
            "random" => Strategy::Random(Random::new()),
            "least-conn" => Strategy::LeastConn(LeastConn::new()),
            "least-response" => Strategy::LeastResponse(LeastResponse::new()),
            "weighted-round-robin" => Strategy::WeightedRoundRobin(WeightedRoundRobin::new()),
            "consistent_hash" => Strategy::ConsistentHash(ConsistentHash::new(config.virtual_nodes)),
            other => {
                warn!(requested = other, "unknown strategy, defaulting to round-robin");
                Strategy::RoundRobin(RoundRobin::new())
            }
        }
    }

    /// Canonical name, reported in the metrics snapshot.
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::RoundRobin(_) => "round-robin",
            Strategy::Random(_) => "random",
            Strategy::LeastConn(_) => "least-conn",
            Strategy::LeastResponse(_) => "least-response",
            Strategy::WeightedRoundRobin(_) => "weighted-round-robin",
            Strategy::ConsistentHash(_) => "consistent_hash",
        }
    }

    /// Pick a backend from the candidate set.
    pub fn select(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        match self {
            Strategy::RoundRobin(s) => s.select(candidates),
            Strategy::Random(s) => s.select(candidates),
            Strategy::LeastConn(s) => s.select(candidates),
            Strategy::LeastResponse(s) => s.select(candidates),
            Strategy::WeightedRoundRobin(s) => s.select(candidates),
            Strategy::ConsistentHash(s) => s.select(candidates),
        }
    }

    /// Set the per-request selection key. No-op unless the strategy
    /// hashes by key.
    pub fn set_key(&self, key: &str) {
        if let Strategy::ConsistentHash(s) = self {
            s.set_key(key);
        }
    }

    /// Whether this strategy consumes a per-request key.
    pub fn uses_key(&self) -> bool {
        matches!(self, Strategy::ConsistentHash(_))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Build healthy test backends on sequential ports.
    pub fn test_backends(n: usize) -> Vec<Arc<Backend>> {
        (0..n)
            .map(|i| {
                let backend = Backend::new(
                    format!("http://127.0.0.1:{}", 9001 + i).parse().unwrap(),
                    1,
                );
                backend.set_healthy(true);
                Arc::new(backend)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(name: &str) -> StrategyConfig {
        StrategyConfig {
            strategy_type: name.to_string(),
            virtual_nodes: 100,
        }
    }

    #[test]
    fn test_from_config_known_names() {
        for name in [
            "round-robin",
            "random",
            "least-conn",
            "least-response",
            "weighted-round-robin",
            "consistent_hash",
        ] {
            let strategy = Strategy::from_config(&config_for(name));
            assert_eq!(strategy.name(), name);
        }
    }

    #[test]
    fn test_from_config_unknown_defaults_to_round_robin() {
        let strategy = Strategy::from_config(&config_for("power-of-two"));
        assert_eq!(strategy.name(), "round-robin");
    }

    #[test]
    fn test_only_consistent_hash_uses_key() {
        assert!(Strategy::from_config(&config_for("consistent_hash")).uses_key());
        assert!(!Strategy::from_config(&config_for("round-robin")).uses_key());
        assert!(!Strategy::from_config(&config_for("least-conn")).uses_key());
    }

    #[test]
    fn test_set_key_noop_for_non_hash() {
        let strategy = Strategy::from_config(&config_for("round-robin"));
        // Must not panic or affect later selections.
        strategy.set_key("192.168.1.100");

        let backends = test_support::test_backends(2);
        assert!(strategy.select(&backends).is_some());
    }
}

//! Aggregated metrics state and snapshots.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Response-time samples retained per backend; older samples drop FIFO.
const MAX_RESPONSE_SAMPLES: usize = 1000;

/// The single consumer's aggregation state.
///
/// Writes happen only on the collector task; the snapshot endpoint
/// reads through the collector's shared lock.
pub struct MetricsStore {
    requests: HashMap<String, i64>,
    selections: HashMap<String, i64>,
    response_samples: HashMap<String, VecDeque<Duration>>,
    status_codes: HashMap<String, HashMap<u16, i64>>,
    health_status: HashMap<String, bool>,
    start_time: Instant,
}

/// JSON snapshot served at `GET /metrics`.
#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub total_requests: i64,
    #[serde(with = "duration_ns")]
    pub uptime: Duration,
    pub algorithm: String,
    pub backends: HashMap<String, BackendMetrics>,
}

/// Aggregates for one backend.
#[derive(Debug, Serialize)]
pub struct BackendMetrics {
    pub requests: i64,
    pub selections: i64,
    pub healthy: bool,
    #[serde(with = "duration_ns")]
    pub avg_response: Duration,
    #[serde(with = "duration_ns")]
    pub p50_response: Duration,
    #[serde(with = "duration_ns")]
    pub p95_response: Duration,
    #[serde(with = "duration_ns")]
    pub p99_response: Duration,
    pub status_codes: HashMap<u16, i64>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self {
            requests: HashMap::new(),
            selections: HashMap::new(),
            response_samples: HashMap::new(),
            status_codes: HashMap::new(),
            health_status: HashMap::new(),
            start_time: Instant::now(),
        }
    }

    pub fn increment_requests(&mut self, backend: &str) {
        *self.requests.entry(backend.to_string()).or_insert(0) += 1;
    }

    pub fn record_selection(&mut self, backend: &str) {
        *self.selections.entry(backend.to_string()).or_insert(0) += 1;
    }

    pub fn record_response(&mut self, backend: &str, duration: Duration, status: u16) {
        let samples = self
            .response_samples
            .entry(backend.to_string())
            .or_default();
        samples.push_back(duration);
        if samples.len() > MAX_RESPONSE_SAMPLES {
            samples.pop_front();
        }

        *self
            .status_codes
            .entry(backend.to_string())
            .or_default()
            .entry(status)
            .or_insert(0) += 1;
    }

    pub fn update_health(&mut self, backend: &str, healthy: bool) {
        self.health_status.insert(backend.to_string(), healthy);
    }

    /// Build a point-in-time snapshot across every backend that has
    /// appeared in any map.
    pub fn snapshot(&self, algorithm: &str) -> Snapshot {
        let mut backends: HashMap<String, BackendMetrics> = HashMap::new();
        let mut total_requests = 0;

        let all_backends: std::collections::HashSet<&String> = self
            .requests
            .keys()
            .chain(self.selections.keys())
            .chain(self.response_samples.keys())
            .chain(self.health_status.keys())
            .collect();

        for backend in all_backends {
            let requests = self.requests.get(backend).copied().unwrap_or(0);
            total_requests += requests;

            let mut metrics = BackendMetrics {
                requests,
                selections: self.selections.get(backend).copied().unwrap_or(0),
                healthy: self.health_status.get(backend).copied().unwrap_or(false),
                avg_response: Duration::ZERO,
                p50_response: Duration::ZERO,
                p95_response: Duration::ZERO,
                p99_response: Duration::ZERO,
                status_codes: self.status_codes.get(backend).cloned().unwrap_or_default(),
            };

            if let Some(samples) = self.response_samples.get(backend) {
                if !samples.is_empty() {
                    let mut sorted: Vec<Duration> = samples.iter().copied().collect();
                    sorted.sort_unstable();

                    metrics.avg_response = average(&sorted);
                    metrics.p50_response = percentile(&sorted, 0.50);
                    metrics.p95_response = percentile(&sorted, 0.95);
                    metrics.p99_response = percentile(&sorted, 0.99);
                }
            }

            backends.insert(backend.clone(), metrics);
        }

        Snapshot {
            total_requests,
            uptime: self.start_time.elapsed(),
            algorithm: algorithm.to_string(),
            backends,
        }
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

fn average(durations: &[Duration]) -> Duration {
    if durations.is_empty() {
        return Duration::ZERO;
    }

    let sum: Duration = durations.iter().sum();
    sum / durations.len() as u32
}

/// Index into a sorted sample set at `floor(p * n)`, clamped to `n - 1`.
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }

    let index = ((sorted.len() as f64) * p) as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Serialize durations as integer nanoseconds.
mod duration_ns {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_nanos().min(u64::MAX as u128) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut store = MetricsStore::new();

        store.increment_requests("http://a/");
        store.increment_requests("http://a/");
        store.record_selection("http://a/");

        let snap = store.snapshot("round-robin");
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.backends["http://a/"].requests, 2);
        assert_eq!(snap.backends["http://a/"].selections, 1);
        assert_eq!(snap.algorithm, "round-robin");
    }

    #[test]
    fn test_response_aggregates() {
        let mut store = MetricsStore::new();

        store.record_response("http://a/", Duration::from_millis(50), 201);

        let snap = store.snapshot("round-robin");
        let metrics = &snap.backends["http://a/"];
        assert_eq!(metrics.avg_response, Duration::from_millis(50));
        assert_eq!(metrics.p50_response, Duration::from_millis(50));
        assert_eq!(metrics.status_codes[&201], 1);
    }

    #[test]
    fn test_percentile_ordering() {
        let mut store = MetricsStore::new();

        for ms in 1..=100 {
            store.record_response("http://a/", Duration::from_millis(ms), 200);
        }

        let snap = store.snapshot("round-robin");
        let metrics = &snap.backends["http://a/"];
        assert!(metrics.p50_response <= metrics.p95_response);
        assert!(metrics.p95_response <= metrics.p99_response);
        assert_eq!(metrics.p50_response, Duration::from_millis(51));
        assert_eq!(metrics.p95_response, Duration::from_millis(96));
        assert_eq!(metrics.p99_response, Duration::from_millis(100));
    }

    #[test]
    fn test_sample_window_is_bounded() {
        let mut store = MetricsStore::new();

        // The first 500 slow samples age out of the 1000-sample window.
        for _ in 0..500 {
            store.record_response("http://a/", Duration::from_secs(10), 200);
        }
        for _ in 0..1000 {
            store.record_response("http://a/", Duration::from_millis(1), 200);
        }

        let snap = store.snapshot("round-robin");
        assert_eq!(
            snap.backends["http://a/"].avg_response,
            Duration::from_millis(1)
        );
    }

    #[test]
    fn test_empty_samples_zero_durations() {
        let mut store = MetricsStore::new();
        store.increment_requests("http://a/");

        let snap = store.snapshot("round-robin");
        let metrics = &snap.backends["http://a/"];
        assert_eq!(metrics.avg_response, Duration::ZERO);
        assert_eq!(metrics.p99_response, Duration::ZERO);
    }

    #[test]
    fn test_health_defaults_false() {
        let mut store = MetricsStore::new();
        store.increment_requests("http://a/");
        store.update_health("http://b/", true);

        let snap = store.snapshot("round-robin");
        assert!(!snap.backends["http://a/"].healthy);
        assert!(snap.backends["http://b/"].healthy);
    }

    #[test]
    fn test_snapshot_serializes_ns() {
        let mut store = MetricsStore::new();
        store.record_response("http://a/", Duration::from_millis(50), 200);

        let snap = store.snapshot("least-conn");
        let json: serde_json::Value = serde_json::to_value(&snap).unwrap();

        assert_eq!(json["algorithm"], "least-conn");
        assert_eq!(json["backends"]["http://a/"]["avg_response"], 50_000_000u64);
        assert_eq!(json["backends"]["http://a/"]["status_codes"]["200"], 1);
    }
}

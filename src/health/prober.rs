//! Active health prober.
//!
//! One prober task runs per backend, independently driving that
//! backend's health flag from periodic `GET /health` probes.

use crate::backend::{Backend, ProxyBody};
use crate::metrics::{MetricEvent, MetricsCollector};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::{Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{info, warn};

/// Hard deadline for one probe round trip.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const PROBE_PATH: &str = "/health";

/// Periodically probes one backend and flips its health flag.
pub struct HealthProber {
    backend: Arc<Backend>,
    interval: Duration,
    metrics: MetricsCollector,
}

impl HealthProber {
    /// Create a prober for one backend.
    pub fn new(backend: Arc<Backend>, interval: Duration, metrics: MetricsCollector) -> Self {
        Self {
            backend,
            interval,
            metrics,
        }
    }

    /// Probe until the shutdown signal fires.
    ///
    /// The first tick fires immediately, seeding health state without
    /// waiting a full interval.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let healthy = match self.probe().await {
                        Some(healthy) => healthy,
                        // Could not even build the probe request; try
                        // again next tick.
                        None => continue,
                    };

                    let changed = self.backend.set_healthy(healthy);
                    if changed {
                        if healthy {
                            info!(server = %self.backend.url_str(), "backend is back up");
                        } else {
                            warn!(server = %self.backend.url_str(), "backend is down");
                        }
                        self.metrics
                            .emit(MetricEvent::health_changed(self.backend.url_str(), healthy));
                    }
                }

                _ = shutdown.recv() => {
                    info!(server = %self.backend.url_str(), "health prober stopped");
                    return;
                }
            }
        }
    }

    /// One probe: `Some(healthy)` from a completed check, `None` when
    /// the request could not be built. Transport errors and timeouts
    /// count as unhealthy.
    async fn probe(&self) -> Option<bool> {
        let request = self.build_request()?;

        match timeout(PROBE_TIMEOUT, self.backend.forwarder().forward(request)).await {
            Ok(Ok(response)) => Some(response.status() == StatusCode::OK),
            Ok(Err(_)) | Err(_) => Some(false),
        }
    }

    fn build_request(&self) -> Option<Request<ProxyBody>> {
        let host = self.backend.url().authority()?.as_str().to_string();

        Request::builder()
            .method("GET")
            .uri(PROBE_PATH)
            .header("host", host)
            .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;
    use crate::util::ShutdownSignal;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Minimal /health server; responds with the given status line.
    fn start_health_server(status_line: &'static str) -> (std::net::SocketAddr, Arc<AtomicU32>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let probes = Arc::new(AtomicU32::new(0));
        let count = Arc::clone(&probes);

        std::thread::spawn(move || {
            for mut stream in listener.incoming().flatten() {
                count.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let response = format!(
                    "{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status_line
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        (addr, probes)
    }

    fn prober_for(addr: std::net::SocketAddr) -> (Arc<Backend>, HealthProber) {
        let backend = Arc::new(Backend::new(
            format!("http://{}", addr).parse().unwrap(),
            1,
        ));
        let (metrics, _task) = MetricsCollector::new(16);
        let prober = HealthProber::new(
            Arc::clone(&backend),
            Duration::from_millis(50),
            metrics,
        );
        (backend, prober)
    }

    #[tokio::test]
    async fn test_healthy_on_200() {
        let (addr, probes) = start_health_server("HTTP/1.1 200 OK");
        let (backend, prober) = prober_for(addr);

        assert!(!backend.is_healthy());

        let shutdown = ShutdownSignal::new();
        let handle = tokio::spawn(prober.run(shutdown.subscribe()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.shutdown();
        handle.await.unwrap();

        assert!(backend.is_healthy());
        assert!(probes.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_unhealthy_on_non_200() {
        let (addr, _) = start_health_server("HTTP/1.1 503 Service Unavailable");
        let (backend, prober) = prober_for(addr);

        let shutdown = ShutdownSignal::new();
        let handle = tokio::spawn(prober.run(shutdown.subscribe()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.shutdown();
        handle.await.unwrap();

        assert!(!backend.is_healthy());
    }

    #[tokio::test]
    async fn test_unhealthy_on_transport_error() {
        // Nothing is listening on this port.
        let backend = Arc::new(Backend::new("http://127.0.0.1:1".parse().unwrap(), 1));
        backend.set_healthy(true);

        let (metrics, _task) = MetricsCollector::new(16);
        let prober = HealthProber::new(
            Arc::clone(&backend),
            Duration::from_millis(50),
            metrics,
        );

        let shutdown = ShutdownSignal::new();
        let handle = tokio::spawn(prober.run(shutdown.subscribe()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.shutdown();
        handle.await.unwrap();

        assert!(!backend.is_healthy());
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let (addr, probes) = start_health_server("HTTP/1.1 200 OK");
        let (_backend, prober) = prober_for(addr);

        let shutdown = ShutdownSignal::new();
        let handle = tokio::spawn(prober.run(shutdown.subscribe()));

        tokio::time::sleep(Duration::from_millis(120)).await;
        shutdown.shutdown();
        handle.await.unwrap();

        let after_stop = probes.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(probes.load(Ordering::SeqCst), after_stop);
    }
}

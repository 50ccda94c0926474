//! Metric event collection.

use crate::metrics::{MetricEvent, MetricsStore, Snapshot};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{broadcast, mpsc};
use tracing::info;

/// Producer handle for the metrics pipeline.
///
/// Cheap to clone; every emitter (forwarding handler, health probers)
/// holds one. `emit` never blocks: when the channel is full the event
/// is dropped.
#[derive(Clone)]
pub struct MetricsCollector {
    events: mpsc::Sender<MetricEvent>,
    store: Arc<RwLock<MetricsStore>>,
}

/// The single consumer end of the pipeline.
pub struct CollectorTask {
    events: mpsc::Receiver<MetricEvent>,
    store: Arc<RwLock<MetricsStore>>,
}

impl MetricsCollector {
    /// Create the pipeline with the given channel capacity.
    ///
    /// Returns the producer handle and the consumer task; the task must
    /// be spawned for events to be aggregated.
    pub fn new(capacity: usize) -> (Self, CollectorTask) {
        let (tx, rx) = mpsc::channel(capacity);
        let store = Arc::new(RwLock::new(MetricsStore::new()));

        (
            Self {
                events: tx,
                store: Arc::clone(&store),
            },
            CollectorTask { events: rx, store },
        )
    }

    /// Emit an event, dropping it if the channel is full or closed.
    pub fn emit(&self, event: MetricEvent) {
        let _ = self.events.try_send(event);
    }

    /// Snapshot the aggregated state.
    pub fn snapshot(&self, algorithm: &str) -> Snapshot {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(algorithm)
    }
}

impl CollectorTask {
    /// Consume events until shutdown, then drain whatever is buffered.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("metrics collector started");

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.process(event),
                        // Every producer is gone.
                        None => break,
                    }
                }

                _ = shutdown.recv() => {
                    self.drain();
                    break;
                }
            }
        }

        info!("metrics collector stopped");
    }

    fn process(&self, event: MetricEvent) {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);

        match event {
            MetricEvent::RequestReceived { backend, .. } => {
                store.increment_requests(&backend);
            }
            MetricEvent::BackendSelected { backend, .. } => {
                store.record_selection(&backend);
            }
            MetricEvent::ResponseCompleted {
                backend,
                duration,
                status,
                ..
            } => {
                store.record_response(&backend, duration, status);
            }
            MetricEvent::HealthChanged {
                backend, healthy, ..
            } => {
                store.update_health(&backend, healthy);
            }
        }
    }

    /// Pull already-buffered events without waiting, so events enqueued
    /// before shutdown are not lost.
    fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.process(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ShutdownSignal;
    use std::time::Duration;

    #[tokio::test]
    async fn test_events_aggregate_into_snapshot() {
        let (collector, task) = MetricsCollector::new(100);
        let shutdown = ShutdownSignal::new();
        let handle = tokio::spawn(task.run(shutdown.subscribe()));

        collector.emit(MetricEvent::request_received("http://a/"));
        collector.emit(MetricEvent::backend_selected("http://a/"));
        collector.emit(MetricEvent::response_completed(
            "http://a/",
            Duration::from_millis(50),
            201,
        ));

        // Let the consumer catch up, then stop it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.shutdown();
        handle.await.unwrap();

        let snap = collector.snapshot("round-robin");
        let metrics = &snap.backends["http://a/"];
        assert_eq!(metrics.requests, 1);
        assert_eq!(metrics.selections, 1);
        assert_eq!(metrics.avg_response, Duration::from_millis(50));
        assert_eq!(metrics.status_codes[&201], 1);
    }

    #[tokio::test]
    async fn test_drains_buffered_events_on_shutdown() {
        let (collector, task) = MetricsCollector::new(100);
        let shutdown = ShutdownSignal::new();

        // Enqueue before the consumer ever runs, then shut down
        // immediately: the drain must still account for every event.
        for _ in 0..10 {
            collector.emit(MetricEvent::request_received("http://a/"));
        }
        shutdown.shutdown();
        task.run(shutdown.subscribe()).await;

        let snap = collector.snapshot("round-robin");
        assert_eq!(snap.total_requests, 10);
    }

    #[tokio::test]
    async fn test_full_channel_drops_events() {
        let (collector, task) = MetricsCollector::new(2);
        let shutdown = ShutdownSignal::new();

        // Capacity 2: the rest are dropped at the producer, never
        // delivered late or twice.
        for _ in 0..50 {
            collector.emit(MetricEvent::request_received("http://a/"));
        }
        shutdown.shutdown();
        task.run(shutdown.subscribe()).await;

        let snap = collector.snapshot("round-robin");
        assert_eq!(snap.total_requests, 2);
    }

    #[tokio::test]
    async fn test_health_events() {
        let (collector, task) = MetricsCollector::new(10);
        let shutdown = ShutdownSignal::new();

        collector.emit(MetricEvent::health_changed("http://a/", true));
        shutdown.shutdown();
        task.run(shutdown.subscribe()).await;

        let snap = collector.snapshot("round-robin");
        assert!(snap.backends["http://a/"].healthy);
    }
}

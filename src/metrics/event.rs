//! Metric events.

use std::time::{Duration, SystemTime};

/// One observation emitted by the request path or a health prober.
///
/// Emission is non-blocking: when the pipeline's channel is full the
/// event is dropped and the request is unaffected.
#[derive(Debug, Clone)]
pub enum MetricEvent {
    /// A request was admitted for a backend.
    RequestReceived { at: SystemTime, backend: String },
    /// The coordinator picked a backend for an attempt.
    BackendSelected { at: SystemTime, backend: String },
    /// An upstream response completed.
    ResponseCompleted {
        at: SystemTime,
        backend: String,
        duration: Duration,
        status: u16,
    },
    /// A health prober observed a transition.
    HealthChanged {
        at: SystemTime,
        backend: String,
        healthy: bool,
    },
}

impl MetricEvent {
    pub fn request_received(backend: &str) -> Self {
        MetricEvent::RequestReceived {
            at: SystemTime::now(),
            backend: backend.to_string(),
        }
    }

    pub fn backend_selected(backend: &str) -> Self {
        MetricEvent::BackendSelected {
            at: SystemTime::now(),
            backend: backend.to_string(),
        }
    }

    pub fn response_completed(backend: &str, duration: Duration, status: u16) -> Self {
        MetricEvent::ResponseCompleted {
            at: SystemTime::now(),
            backend: backend.to_string(),
            duration,
            status,
        }
    }

    pub fn health_changed(backend: &str, healthy: bool) -> Self {
        MetricEvent::HealthChanged {
            at: SystemTime::now(),
            backend: backend.to_string(),
            healthy,
        }
    }
}

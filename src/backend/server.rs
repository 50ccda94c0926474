//! Backend server state.

use crate::backend::Forwarder;
use hyper::Uri;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// EWMA smoothing factor for response-time tracking.
const EWMA_ALPHA: f64 = 0.2;

/// One upstream server: URL, weight, health flag, active-connection
/// counter, and an EWMA of observed response times.
///
/// All mutable state sits behind a single mutex so that readers observe
/// a consistent view of `(healthy, active_connections, ewma)` against
/// any one mutation. Backends start unhealthy; only the health prober
/// flips the flag.
pub struct Backend {
    url: Uri,
    url_text: String,
    weight: u32,
    forwarder: Forwarder,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    healthy: bool,
    active_connections: u32,
    ewma_response: Duration,
    has_sample: bool,
}

impl Backend {
    /// Create a new backend for the given base URL.
    pub fn new(url: Uri, weight: u32) -> Self {
        let forwarder = Forwarder::new(&url);
        let url_text = url.to_string();

        Self {
            url,
            url_text,
            weight,
            forwarder,
            state: Mutex::new(State::default()),
        }
    }

    /// The backend's base URL.
    pub fn url(&self) -> &Uri {
        &self.url
    }

    /// The backend's URL as a string; used as its identity in the
    /// breaker registry, exclusion sets, and metric events.
    pub fn url_str(&self) -> &str {
        &self.url_text
    }

    /// Weight for weighted strategies.
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// The reverse-proxy client rooted at this backend.
    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    /// Increment the active connection count.
    pub fn increment_conn(&self) {
        self.lock().active_connections += 1;
    }

    /// Decrement the active connection count, saturating at zero.
    pub fn decrement_conn(&self) {
        let mut state = self.lock();
        state.active_connections = state.active_connections.saturating_sub(1);
    }

    /// Current number of active connections.
    pub fn active_connections(&self) -> u32 {
        self.lock().active_connections
    }

    /// Whether the backend is currently healthy.
    pub fn is_healthy(&self) -> bool {
        self.lock().healthy
    }

    /// Update the health flag.
    ///
    /// Returns true if the status changed, false if it was already in
    /// that state.
    pub fn set_healthy(&self, healthy: bool) -> bool {
        let mut state = self.lock();
        if state.healthy == healthy {
            return false;
        }
        state.healthy = healthy;
        true
    }

    /// Fold a response time into the EWMA.
    ///
    /// The first sample seeds the average; later samples are blended as
    /// `ewma = (1 - alpha) * ewma + alpha * sample`.
    pub fn record_response(&self, duration: Duration) {
        let mut state = self.lock();

        if !state.has_sample {
            state.ewma_response = duration;
            state.has_sample = true;
            return;
        }

        let blended = (1.0 - EWMA_ALPHA) * state.ewma_response.as_secs_f64()
            + EWMA_ALPHA * duration.as_secs_f64();
        state.ewma_response = Duration::from_secs_f64(blended);
    }

    /// The EWMA response time, or zero if nothing has been recorded yet.
    pub fn ewma_response(&self) -> Duration {
        let state = self.lock();
        if state.has_sample {
            state.ewma_response
        } else {
            Duration::ZERO
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("url", &self.url_text)
            .field("weight", &self.weight)
            .finish()
    }
}

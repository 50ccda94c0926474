//! Request ID generation for request tracing.
//!
//! Every proxied request gets an identifier so its attempt loop can be
//! followed through the logs.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Request ID included in forwarding-handler log events.
#[derive(Clone, Debug)]
pub struct RequestId(String);

impl RequestId {
    /// Create a new UUID-based request ID, globally unique.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a counter-based request ID, unique within this process.
    ///
    /// Format: `req-{counter}` with the counter zero-padded to 16 hex digits.
    pub fn short() -> Self {
        let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("req-{:016x}", count))
    }

    /// Get the request ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uuid_request_id() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();

        assert_ne!(id1.as_str(), id2.as_str());
        assert_eq!(id1.as_str().len(), 36);
    }

    #[test]
    fn test_short_request_id_uniqueness() {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let id = RequestId::short();
            assert!(id.as_str().starts_with("req-"));
            assert!(ids.insert(id.as_str().to_string()), "duplicate ID generated");
        }
    }

    #[test]
    fn test_request_id_display() {
        let id = RequestId::short();
        assert_eq!(format!("{}", id), id.as_str());
    }
}

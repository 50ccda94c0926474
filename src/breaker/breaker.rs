//! Circuit breaker state machine.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation; requests flow.
    Closed,
    /// Requests are short-circuited.
    Open,
    /// Probing: requests are admitted to test recovery.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Open => write!(f, "OPEN"),
            BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Advisory three-state gate in front of one backend.
///
/// A caller that receives `true` from [`allow`](Self::allow) is
/// expected to report the attempt's outcome through exactly one of
/// [`record_success`](Self::record_success) /
/// [`record_failure`](Self::record_failure). In HALF_OPEN, concurrent
/// callers may all be admitted; the breaker is a gate, not a mutex.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

struct Inner {
    state: BreakerState,
    failures: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                last_failure: None,
            }),
            failure_threshold,
            reset_timeout,
        }
    }

    /// Whether a request may be attempted right now.
    ///
    /// In OPEN, once `reset_timeout` has elapsed since the last failure
    /// the breaker moves to HALF_OPEN and admits the caller as a probe.
    pub fn allow(&self) -> bool {
        let mut inner = self.lock();

        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);

                if elapsed >= self.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => true,
        }
    }

    /// Report a successful attempt: closes the breaker from any state.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.failures = 0;
        inner.state = BreakerState::Closed;
    }

    /// Report a failed attempt.
    ///
    /// Opens the breaker from HALF_OPEN, or from CLOSED once the
    /// failure count reaches the threshold.
    pub fn record_failure(&self) {
        let mut inner = self.lock();

        inner.failures += 1;
        inner.last_failure = Some(Instant::now());

        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Open;
        }

        if inner.failures >= self.failure_threshold {
            inner.state = BreakerState::Open;
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

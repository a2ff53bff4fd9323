//! Circuit breaker pattern implementation.
//!
//! One breaker guards one backend. Failures are counted inside a rolling
//! window; once the threshold is reached every call fails fast until the
//! cool-down elapses, after which a single probe request is let through.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests are allowed.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, a single probe request is allowed.
    HalfOpen,
}

/// Result of asking the breaker to let a request through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request is rejected.
    Rejected,
    /// The request may proceed.
    Allowed,
    /// The request may proceed and holds the half-open probe slot.
    Probe,
}

impl Admission {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Circuit breaker policy.
#[derive(Debug, Clone)]
pub struct CircuitPolicy {
    /// Whether the breaker is active at all.
    pub enabled: bool,
    /// Number of failures inside the rolling window that opens the circuit.
    pub failure_threshold: u32,
    /// Time window for counting failures.
    pub rolling_window: Duration,
    /// Time to stay open before letting a probe through.
    pub half_open_after: Duration,
}

impl Default for CircuitPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            rolling_window: Duration::from_secs(60),
            half_open_after: Duration::from_secs(30),
        }
    }
}

impl CircuitPolicy {
    /// Create a new circuit policy.
    pub fn new(failure_threshold: u32, half_open_after: Duration) -> Self {
        Self {
            failure_threshold,
            half_open_after,
            ..Default::default()
        }
    }

    /// A policy that never trips.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Set the failure counting window.
    pub fn with_rolling_window(mut self, window: Duration) -> Self {
        self.rolling_window = window;
        self
    }

    /// Set the failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the open duration before a probe is allowed.
    pub fn with_half_open_after(mut self, duration: Duration) -> Self {
        self.half_open_after = duration;
        self
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
    failure_timestamps: VecDeque<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            opened_at: None,
            half_open_probe_in_flight: false,
            failure_timestamps: VecDeque::new(),
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.half_open_probe_in_flight = false;
        self.failure_timestamps.clear();
    }
}

/// Circuit breaker implementation.
///
/// All transitions happen under a single lock so that the failure threshold
/// and the single-probe guarantee hold under concurrent callers.
#[derive(Debug)]
pub struct CircuitBreaker {
    policy: CircuitPolicy,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(policy: CircuitPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    /// Get the breaker policy.
    pub fn policy(&self) -> &CircuitPolicy {
        &self.policy
    }

    /// Get the current circuit state.
    ///
    /// An open circuit whose cool-down has elapsed is reported as half-open
    /// without consuming the probe slot.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened))
                if opened.elapsed() >= self.policy.half_open_after =>
            {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }

    /// Check if a request is allowed.
    pub fn allow(&self) -> bool {
        self.admit().is_allowed()
    }

    /// Admit a request, reporting whether it took the probe slot.
    pub fn admit(&self) -> Admission {
        if !self.policy.enabled {
            return Admission::Allowed;
        }

        let mut inner = self.inner.lock();
        self.admit_locked(&mut inner, Instant::now())
    }

    fn admit_locked(&self, inner: &mut BreakerState, now: Instant) -> Admission {
        match inner.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened| now.saturating_duration_since(opened))
                    .unwrap_or_default();
                if elapsed >= self.policy.half_open_after {
                    debug!("Circuit breaker transitioning to half-open");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_probe_in_flight = false;
                    self.admit_locked(inner, now)
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_probe_in_flight {
                    Admission::Rejected
                } else {
                    inner.half_open_probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Record a successful request.
    pub fn on_success(&self) {
        if !self.policy.enabled {
            return;
        }

        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_timestamps.clear(),
            CircuitState::HalfOpen => {
                info!("Circuit breaker closing after successful probe");
                *inner = BreakerState::closed();
            }
            CircuitState::Open => {
                debug!("Success recorded while circuit open, ignoring");
            }
        }
    }

    /// Record a failed request.
    pub fn on_failure(&self) {
        if !self.policy.enabled {
            return;
        }

        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_timestamps.push_back(now);
                let window = self.policy.rolling_window;
                while let Some(oldest) = inner.failure_timestamps.front() {
                    if now.saturating_duration_since(*oldest) > window {
                        inner.failure_timestamps.pop_front();
                    } else {
                        break;
                    }
                }

                let failures = inner.failure_timestamps.len() as u32;
                if failures >= self.policy.failure_threshold {
                    warn!(failures, "Circuit breaker opening");
                    inner.open(now);
                }
            }
            CircuitState::HalfOpen => {
                warn!("Probe failed, circuit breaker re-opening");
                inner.open(now);
            }
            CircuitState::Open => {
                // opened_at stays pinned
            }
        }
    }

    /// Give back a half-open probe slot whose request never completed.
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.half_open_probe_in_flight {
            debug!("Half-open probe abandoned, releasing slot");
            inner.half_open_probe_in_flight = false;
        }
    }

    /// Number of failures currently inside the rolling window.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_timestamps.len() as u32
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerState::closed();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitPolicy::default())
    }
}

//! Per-instance circuit breaker.
//!
//! Each upstream instance owns one breaker. A failure is a transport error
//! or a 5xx response; upstream 4xx responses never count against the
//! breaker. State transitions:
//!
//! * `Closed` - requests permitted; rolling window counts every outcome.
//!   Trips to `Open` when the window has at least `min_requests` samples and
//!   either the failure ratio reaches the threshold or the consecutive
//!   failure count reaches `max_failures`.
//! * `Open` - requests blocked until `next_probe_at`
//!   (= `opened_at + reset_timeout`); rolling counters reset on entry.
//! * `HalfOpen` - exactly one outstanding probe. Probe success closes the
//!   breaker and resets counters; probe failure reopens it with a fresh
//!   `next_probe_at`.

use crate::models::settings::BreakerSettings;
use log::{info, warn};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// State of a circuit breaker. Gauge encoding: 0 closed, 1 open, 2 half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    /// Numeric form for the `circuit_breaker_state` gauge.
    pub fn as_gauge(&self) -> u8 {
        *self as u8
    }
}

/// Admission answer for the load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerCheck {
    /// Closed: instance is fully eligible.
    Ready,
    /// Half-open with a free probe slot: eligible only as the single probe.
    ProbeCandidate,
    /// Open, or half-open with the probe already outstanding.
    Blocked,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    window_requests: u32,
    window_failures: u32,
    opened_at: Option<Instant>,
    next_probe_at: Option<Instant>,
    probe_outstanding: bool,
}

/// Circuit breaker guarding one upstream instance.
///
/// All transitions are serialized behind one short-lived mutex; readers may
/// observe a slightly stale state, which is acceptable for selection.
#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
    /// Instance id, used in log lines only.
    name: String,
}

impl CircuitBreaker {
    pub fn new(name: String, settings: BreakerSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                window_requests: 0,
                window_failures: 0,
                opened_at: None,
                next_probe_at: None,
                probe_outstanding: false,
            }),
            name,
        }
    }

    fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.reset_timeout_secs)
    }

    /// Current admission state, transitioning open breakers to half-open
    /// once the reset timeout has elapsed.
    pub fn check(&self) -> BreakerCheck {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.advance_if_due(&mut inner);
        match inner.state {
            CircuitState::Closed => BreakerCheck::Ready,
            CircuitState::Open => BreakerCheck::Blocked,
            CircuitState::HalfOpen if inner.probe_outstanding => BreakerCheck::Blocked,
            CircuitState::HalfOpen => BreakerCheck::ProbeCandidate,
        }
    }

    /// Claims the single half-open probe slot. Returns false when the
    /// breaker is not half-open or another probe is already in flight.
    pub fn try_claim_probe(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.advance_if_due(&mut inner);
        if inner.state == CircuitState::HalfOpen && !inner.probe_outstanding {
            inner.probe_outstanding = true;
            true
        } else {
            false
        }
    }

    /// Records a successful attempt (status < 500, no transport error).
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            CircuitState::Closed => {
                inner.window_requests += 1;
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                info!("circuit breaker {} closed after successful probe", self.name);
                Self::to_closed(&mut inner);
            }
            // Stale result from before the trip; ignore.
            CircuitState::Open => {}
        }
    }

    /// Records a failed attempt (transport error or 5xx).
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            CircuitState::Closed => {
                inner.window_requests += 1;
                inner.window_failures += 1;
                inner.consecutive_failures += 1;
                if self.should_trip(&inner) {
                    warn!(
                        "circuit breaker {} opened ({}/{} window failures, {} consecutive)",
                        self.name,
                        inner.window_failures,
                        inner.window_requests,
                        inner.consecutive_failures
                    );
                    self.to_open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                warn!("circuit breaker {} reopened after failed probe", self.name);
                self.to_open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    /// Raw state without the time-based transition; fine for metrics where
    /// slightly stale values are acceptable.
    pub fn current_state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Rolling window sample as `(requests, failures)`.
    pub fn window_counts(&self) -> (u32, u32) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        (inner.window_requests, inner.window_failures)
    }

    fn should_trip(&self, inner: &BreakerInner) -> bool {
        if inner.window_requests < self.settings.min_requests {
            return false;
        }
        let ratio = inner.window_failures as f64 / inner.window_requests as f64;
        ratio >= self.settings.failure_ratio
            || inner.consecutive_failures >= self.settings.max_failures
    }

    fn advance_if_due(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            if let Some(next_probe_at) = inner.next_probe_at {
                if Instant::now() >= next_probe_at {
                    info!("circuit breaker {} half-open, probing", self.name);
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_outstanding = false;
                }
            }
        }
    }

    fn to_open(&self, inner: &mut BreakerInner) {
        let now = Instant::now();
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.next_probe_at = Some(now + self.reset_timeout());
        inner.window_requests = 0;
        inner.window_failures = 0;
        inner.consecutive_failures = 0;
        inner.probe_outstanding = false;
    }

    fn to_closed(inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.next_probe_at = None;
        inner.window_requests = 0;
        inner.window_failures = 0;
        inner.consecutive_failures = 0;
        inner.probe_outstanding = false;
    }
}

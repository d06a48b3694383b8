//! Circuit breaker shared by every caller of a model client.
//!
//! Two stored counters drive three logical states:
//!
//! | State | Condition | Behaviour |
//! |-------|-----------|-----------|
//! | Closed | failures < threshold | calls pass; failures count up |
//! | Open | now < open_until | calls fail fast with [`Error::CircuitOpen`] |
//! | Half-open | now >= open_until | exactly one trial call passes |
//!
//! Time is read from `tokio::time`, so paused-clock tests drive it.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use dossier_core::{Error, Result};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Lock-free circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    reset: Duration,
    epoch: Instant,
    failures: AtomicU32,
    /// Milliseconds since `epoch`; meaningful once failures reach the threshold.
    open_until_ms: AtomicU64,
    trial_in_flight: AtomicBool,
}

impl CircuitBreaker {
    /// A threshold of 0 is treated as 1.
    pub fn new(threshold: u32, reset: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            reset,
            epoch: Instant::now(),
            failures: AtomicU32::new(0),
            open_until_ms: AtomicU64::new(0),
            trial_in_flight: AtomicBool::new(false),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn open_deadline(&self) -> u64 {
        self.now_ms().saturating_add(self.reset.as_millis() as u64)
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn state(&self) -> BreakerState {
        if self.trial_in_flight.load(Ordering::Acquire) {
            return BreakerState::HalfOpen;
        }
        if self.failures() < self.threshold {
            return BreakerState::Closed;
        }
        if self.now_ms() < self.open_until_ms.load(Ordering::Acquire) {
            BreakerState::Open
        } else {
            BreakerState::HalfOpen
        }
    }

    /// True while calls would fail fast.
    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    /// Ask to make a call.
    ///
    /// Returns [`Error::CircuitOpen`] while open, and while another caller
    /// holds the half-open trial. The returned permit must be settled with
    /// [`Permit::success`] or [`Permit::failure`]; dropping an unsettled trial
    /// permit re-arms the open state.
    pub fn acquire(&self) -> Result<Permit<'_>> {
        if self.trial_in_flight.load(Ordering::Acquire) {
            return Err(Error::CircuitOpen);
        }
        if self.failures() < self.threshold {
            return Ok(Permit::new(self, false));
        }
        if self.now_ms() < self.open_until_ms.load(Ordering::Acquire) {
            return Err(Error::CircuitOpen);
        }
        if self
            .trial_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::CircuitOpen);
        }
        // Failures stay at the threshold until the trial settles, so callers
        // that lose the race above still see the circuit as not closed.
        if self.failures() < self.threshold {
            // A previous trial closed the circuit between our checks.
            self.trial_in_flight.store(false, Ordering::Release);
            return Ok(Permit::new(self, false));
        }
        info!(
            subsystem = "inference",
            component = "breaker",
            "Circuit half-open, allowing trial call"
        );
        Ok(Permit::new(self, true))
    }

    fn on_success(&self, trial: bool) {
        self.failures.store(0, Ordering::Release);
        if trial {
            self.trial_in_flight.store(false, Ordering::Release);
            info!(
                subsystem = "inference",
                component = "breaker",
                "Trial call succeeded, circuit closed"
            );
        }
    }

    fn on_failure(&self, trial: bool) {
        if trial {
            self.failures.store(self.threshold, Ordering::Release);
            self.open_until_ms
                .store(self.open_deadline(), Ordering::Release);
            self.trial_in_flight.store(false, Ordering::Release);
            warn!(
                subsystem = "inference",
                component = "breaker",
                reset_ms = self.reset.as_millis() as u64,
                "Trial call failed, circuit re-opened"
            );
            return;
        }

        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.threshold {
            self.open_until_ms
                .store(self.open_deadline(), Ordering::Release);
            if failures == self.threshold {
                warn!(
                    subsystem = "inference",
                    component = "breaker",
                    failures,
                    reset_ms = self.reset.as_millis() as u64,
                    "Failure threshold reached, circuit opened"
                );
            }
        }
    }
}

/// Permission to make one call through the breaker.
#[must_use = "a permit must be settled with success() or failure()"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Whether this is the single half-open trial call.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        // A cancelled trial counts as failed so the breaker cannot wedge half-open.
        if !self.settled && self.trial {
            self.breaker.on_failure(true);
        }
    }
}

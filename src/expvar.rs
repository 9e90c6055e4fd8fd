//! Process-wide request counters, published on the debug listener.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

/// Counters shared by the metrics middleware and `/debug/vars`.
///
/// One instance per process, shared behind an `Arc`.
#[derive(Debug)]
pub struct Expvar {
    started: Instant,
    requests: AtomicU64,
    errors: AtomicU64,
    panics: AtomicU64,
    in_flight: AtomicI64,
}

/// Point-in-time copy of [`Expvar`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Vars {
    pub requests: u64,
    pub errors: u64,
    pub panics: u64,
    pub in_flight: i64,
    pub uptime_secs: u64,
}

impl Expvar {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            panics: AtomicU64::new(0),
            in_flight: AtomicI64::new(0),
        }
    }

    pub fn add_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks a request as in flight until the guard is dropped.
    pub fn enter(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlight(Arc::clone(self))
    }

    pub fn snapshot(&self) -> Vars {
        Vars {
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

impl Default for Expvar {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard returned by [`Expvar::enter`].
#[derive(Debug)]
pub struct InFlight(Arc<Expvar>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

//! Clock sources for unlock, eligibility and epoch arithmetic.
//!
//! The ledger never reads wall-clock time ad hoc: every time-window check
//! goes through an injected [`Clock`], so tests can move time explicitly.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use crate::types::Timestamp;

/// Source of "now" in whole seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall time sampled once, then advanced by a monotonic `Instant`.
///
/// Never goes backwards even if the system clock is adjusted.
pub struct MonotonicClock {
    origin_wall: Timestamp,
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin_wall: chrono::Utc::now().timestamp(),
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        self.origin_wall + self.origin.elapsed().as_secs() as Timestamp
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Move forward by `secs`, returning the new time
    pub fn advance(&self, secs: u64) -> Timestamp {
        self.now.fetch_add(secs as Timestamp, Ordering::SeqCst) + secs as Timestamp
    }

    pub fn advance_days(&self, days: u64) -> Timestamp {
        self.advance(days * crate::constants::DAY_SECS)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

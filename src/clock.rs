//! Time source abstraction
//!
//! Token refill, cooldown gating and alert timestamps all read the current
//! time through [`Clock`] so they can be driven deterministically.

use crate::events::Timestamp;
use chrono::{Duration, Utc};
use std::sync::{Mutex, PoisonError};

/// Source of the current wall-clock time
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Clock that only moves when told to
///
/// Used for replaying recorded samples and in tests that need to step over
/// refill intervals or cooldown windows without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<Timestamp>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Move the clock forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current += by;
    }

    /// Jump the clock to `to`
    pub fn set(&self, to: Timestamp) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Desk clock: the single source of "now" for lifecycle operations.
//!
//! RULE: Lifecycle code never calls `Utc::now()` directly.
//! Production wires `SystemClock`; tests wire `ManualClock` and move
//! time forward explicitly so SLA arithmetic is reproducible.

use crate::types::Timestamp;
use chrono::{Duration, Utc};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self { current: Mutex::new(start) }
    }

    /// Advance by `hours`. Returns the new instant.
    pub fn advance_hours(&self, hours: i64) -> Timestamp {
        self.advance(Duration::hours(hours))
    }

    pub fn advance_days(&self, days: i64) -> Timestamp {
        self.advance(Duration::days(days))
    }

    pub fn advance(&self, by: Duration) -> Timestamp {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += by;
        *current
    }

    pub fn set(&self, to: Timestamp) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

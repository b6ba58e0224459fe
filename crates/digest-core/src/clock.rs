//! Injectable time source (design §9: "required to make weekly triggers
//! deterministic in tests").

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// A source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only advances when told to, for deterministic tests of the
/// weekly adaptive-tuning triggers and catch-up windowing.
#[derive(Debug, Clone)]
pub struct FixedClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    /// Creates a clock pinned at `at`.
    #[must_use]
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(at)),
        }
    }

    /// Advances the clock by `delta`.
    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.inner.lock().expect("clock mutex poisoned");
        *guard += delta;
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.inner.lock().expect("clock mutex poisoned") = at;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock().expect("clock mutex poisoned")
    }
}

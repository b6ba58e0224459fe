//! A consecutive-failure circuit breaker (design §4.2 / glossary).
//!
//! Five consecutive failures trip the breaker for one minute; every call
//! attempted while open fails fast without reaching the network. A single
//! success resets the counter.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

const FAILURE_THRESHOLD: u32 = 5;
const OPEN_DURATION: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct State {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Thread-safe circuit breaker. Callers never hold its lock across a
/// network call; they call [`CircuitBreaker::check`] first, then report
/// the outcome with [`CircuitBreaker::record_success`] /
/// [`CircuitBreaker::record_failure`].
pub struct CircuitBreaker {
    state: Mutex<State>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a call may proceed; `false` if the breaker is
    /// currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        let mut state = self.state.lock();
        if let Some(opened_at) = state.opened_at {
            if opened_at.elapsed() >= OPEN_DURATION {
                // Timeout elapsed: allow a trial call through, half-open-style,
                // by clearing the open marker. A failure will re-open it.
                state.opened_at = None;
                state.consecutive_failures = FAILURE_THRESHOLD.saturating_sub(1);
                false
            } else {
                true
            }
        } else {
            false
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= FAILURE_THRESHOLD && state.opened_at.is_none() {
            state.opened_at = Some(Instant::now());
        }
    }
}

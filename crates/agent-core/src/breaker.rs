//! Circuit breaker: gates outbound HTTP based on recent failures,
//! process-wide, one instance per agent.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

impl State {
    fn as_str(self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half_open",
        }
    }
}

struct BreakerState {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Returned by [`CircuitBreaker::call`] when the circuit is open — the
/// thunk was never invoked.
#[derive(Debug, Clone, Copy)]
pub struct CircuitOpen;

impl std::fmt::Display for CircuitOpen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "circuit breaker open, call skipped")
    }
}

impl std::error::Error for CircuitOpen {}

/// Three-state automaton: closed, open, half_open.
pub struct CircuitBreaker {
    fail_max: u32,
    reset_timeout: Duration,
    state: Mutex<BreakerState>,
}

/// Outcome of a [`CircuitBreaker::call`] attempt, distinguishing a
/// fast-failed call (circuit was open) from the thunk's own error.
pub enum CallOutcome<T, E> {
    Ok(T),
    CircuitOpen,
    Failed(E),
}

impl CircuitBreaker {
    pub fn new(fail_max: u32, reset_timeout: Duration) -> Self {
        Self {
            fail_max,
            reset_timeout,
            state: Mutex::new(BreakerState { state: State::Closed, consecutive_failures: 0, opened_at: None }),
        }
    }

    /// True if a call would currently fail fast. Transitions `open` to
    /// `half_open` as a side effect once `reset_timeout` has elapsed — this
    /// is the only place that transition happens, so call this (or `call`)
    /// before checking state elsewhere.
    pub fn is_open(&self) -> bool {
        let mut guard = self.state.lock().expect("breaker mutex poisoned");
        self.maybe_half_open(&mut guard);
        guard.state == State::Open
    }

    fn maybe_half_open(&self, guard: &mut BreakerState) {
        if guard.state == State::Open {
            if let Some(opened_at) = guard.opened_at {
                if opened_at.elapsed() >= self.reset_timeout {
                    self.transition(guard, State::HalfOpen);
                }
            }
        }
    }

    fn transition(&self, guard: &mut BreakerState, new_state: State) {
        if guard.state == new_state {
            return;
        }
        warn!(old_state = guard.state.as_str(), new_state = new_state.as_str(), "circuit_breaker_state_change");
        guard.state = new_state;
        guard.opened_at = if new_state == State::Open { Some(Instant::now()) } else { None };
    }

    /// Run `f` if the circuit permits it. In `half_open`, exactly one trial
    /// call is permitted regardless of how many callers race here, because
    /// the whole call happens under the lock.
    pub fn call<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> CallOutcome<T, E> {
        let mut guard = self.state.lock().expect("breaker mutex poisoned");
        self.maybe_half_open(&mut guard);

        if guard.state == State::Open {
            return CallOutcome::CircuitOpen;
        }

        let was_half_open = guard.state == State::HalfOpen;
        drop(guard);

        match f() {
            Ok(value) => {
                let mut guard = self.state.lock().expect("breaker mutex poisoned");
                guard.consecutive_failures = 0;
                self.transition(&mut guard, State::Closed);
                CallOutcome::Ok(value)
            }
            Err(e) => {
                let mut guard = self.state.lock().expect("breaker mutex poisoned");
                guard.consecutive_failures += 1;
                if was_half_open || guard.consecutive_failures >= self.fail_max {
                    self.transition(&mut guard, State::Open);
                }
                CallOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_fail_max_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..2 {
            assert!(matches!(breaker.call(|| Err::<(), _>("boom")), CallOutcome::Failed(_)));
        }
        assert!(!breaker.is_open());
        assert!(matches!(breaker.call(|| Err::<(), _>("boom")), CallOutcome::Failed(_)));
        assert!(breaker.is_open());
    }

    #[test]
    fn open_circuit_fails_fast_without_invoking_thunk() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        assert!(matches!(breaker.call(|| Err::<(), _>("boom")), CallOutcome::Failed(_)));
        assert!(breaker.is_open());

        let mut invoked = false;
        let outcome = breaker.call(|| {
            invoked = true;
            Ok::<_, &str>(())
        });
        assert!(matches!(outcome, CallOutcome::CircuitOpen));
        assert!(!invoked);
    }

    #[test]
    fn success_in_closed_state_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(matches!(breaker.call(|| Err::<(), _>("boom")), CallOutcome::Failed(_)));
        assert!(matches!(breaker.call(|| Ok::<_, &str>(())), CallOutcome::Ok(())));
        assert!(matches!(breaker.call(|| Err::<(), _>("boom")), CallOutcome::Failed(_)));
        assert!(matches!(breaker.call(|| Err::<(), _>("boom")), CallOutcome::Failed(_)));
        assert!(!breaker.is_open());
    }

    #[test]
    fn half_open_after_reset_timeout_elapses() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        assert!(matches!(breaker.call(|| Err::<(), _>("boom")), CallOutcome::Failed(_)));
        assert!(breaker.is_open());

        std::thread::sleep(Duration::from_millis(30));
        assert!(!breaker.is_open());
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        assert!(matches!(breaker.call(|| Err::<(), _>("boom")), CallOutcome::Failed(_)));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!breaker.is_open());

        assert!(matches!(breaker.call(|| Err::<(), _>("boom")), CallOutcome::Failed(_)));
        assert!(breaker.is_open());
    }

    #[test]
    fn half_open_success_closes_and_resets() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        assert!(matches!(breaker.call(|| Err::<(), _>("boom")), CallOutcome::Failed(_)));
        std::thread::sleep(Duration::from_millis(30));

        assert!(matches!(breaker.call(|| Ok::<_, &str>(())), CallOutcome::Ok(())));
        assert!(!breaker.is_open());

        assert!(matches!(breaker.call(|| Err::<(), _>("boom")), CallOutcome::Failed(_)));
        assert!(!breaker.is_open());
    }
}

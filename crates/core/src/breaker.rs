//! # Circuit Breaker
//!
//! Per-provider fault isolation with three states: Closed (normal operation),
//! Open (failing fast) and HalfOpen (a single trial request tests recovery).
//!
//! The Open to HalfOpen transition is evaluated lazily inside `can_request()`;
//! there is no background timer. Each breaker owns its own lock, so breakers of
//! unrelated providers never contend.

use crate::config::CircuitBreakerConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - one trial call is allowed through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    /// Set while the single HalfOpen trial is outstanding
    trial_in_flight: bool,
}

/// Failure-isolation state machine for one provider
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new breaker in the Closed state
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        debug!(
            component = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a request may proceed right now.
    ///
    /// An Open circuit whose recovery window has elapsed moves to HalfOpen
    /// and admits exactly one trial; further calls return false until the
    /// trial is resolved.
    pub fn can_request(&self) -> bool {
        self.admit().is_some()
    }

    /// Admit a call and return a permit that settles it.
    ///
    /// Dropping the permit without recording an outcome releases a HalfOpen
    /// trial, so an abandoned call never blocks recovery.
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        self.admit().map(|trial| BreakerPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    /// Admission check; `Some(true)` when the admitted call is the HalfOpen trial
    fn admit(&self) -> Option<bool> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| Instant::now().saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);

                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(component = %self.name, "Circuit half-open, allowing trial request");
                    Some(true)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(true)
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.trial_in_flight = false;
                info!(component = %self.name, "Circuit closed, provider recovered");
            }
            CircuitState::Closed => {}
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late
                debug!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold.max(1) {
                    inner.state = CircuitState::Open;
                    warn!(
                        component = %self.name,
                        failure_count = inner.failure_count,
                        "Circuit opened after consecutive failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.trial_in_flight = false;
                warn!(component = %self.name, "Trial request failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }

    /// Release an admitted HalfOpen trial whose call produced no health signal,
    /// so the next `can_request()` may admit another trial.
    pub fn cancel_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure: inner.last_failure,
        }
    }
}

/// One admitted call. Record its outcome, or drop it to release the slot.
#[derive(Debug)]
#[must_use = "dropping the permit releases the call without recording an outcome"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Whether this call is the HalfOpen trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            debug!(component = %self.breaker.name, "Trial released without an outcome");
            self.breaker.cancel_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(recovery_secs),
            },
        )
    }

    #[test]
    fn test_starts_closed() {
        let cb = breaker(5, 30);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_request());
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = breaker(5, 30);

        for _ in 0..4 {
            cb.record_failure();
            assert!(cb.can_request());
        }

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_request());

        // Further failures keep it open
        cb.record_failure();
        assert!(!cb.can_request());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = breaker(3, 30);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.snapshot().failure_count, 0);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_admits_single_trial() {
        let cb = breaker(1, 30);
        cb.record_failure();
        assert!(!cb.can_request());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!cb.can_request());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.can_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let cb = breaker(1, 10);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(10)).await;

        assert!(cb.can_request());
        cb.record_success();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
        assert!(cb.can_request());
        assert!(cb.can_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 10);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(10)).await;

        assert!(cb.can_request());
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_request());

        // The recovery window restarts from the failed trial
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!cb.can_request());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cb.can_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_trial_allows_another() {
        let cb = breaker(1, 5);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(cb.can_request());
        assert!(!cb.can_request());

        cb.cancel_trial();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.can_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_permit_frees_slot() {
        let cb = breaker(1, 5);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(5)).await;

        let permit = cb.try_acquire().unwrap();
        assert!(permit.is_trial());
        assert!(cb.try_acquire().is_none());

        drop(permit);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let permit = cb.try_acquire().unwrap();
        permit.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_trial_permit_keeps_outcome() {
        let cb = breaker(1, 5);
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(5)).await;

        cb.try_acquire().unwrap().record_failure();

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_none());
    }

    #[test]
    fn test_dropped_closed_permit_changes_nothing() {
        let cb = breaker(2, 5);
        cb.record_failure();

        let permit = cb.try_acquire().unwrap();
        assert!(!permit.is_trial());
        drop(permit);

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 1);
    }

    #[test]
    fn test_cancel_trial_is_noop_when_closed() {
        let cb = breaker(2, 5);
        cb.record_failure();
        cb.cancel_trial();

        let snapshot = cb.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 1);
    }

    #[test]
    fn test_zero_threshold_behaves_as_one() {
        let cb = breaker(0, 5);
        assert!(cb.can_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}

//! Circuit breaker guarding broker access
//!
//! Shared by every dispatch task. State and the consecutive-failure counter
//! live behind a single mutex so each transition is one critical section.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contracts::CircuitState;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Outcome of asking the breaker for permission to hit the broker
#[derive(Debug)]
pub enum Admission<'a> {
    /// Go ahead; report the result through the permit
    Granted(AttemptPermit<'a>),
    /// Not now; re-ask after at most this long (or when woken)
    Deferred(Duration),
}

/// Closed / Open / HalfOpen breaker.
///
/// - `Closed -> Open` after `threshold` consecutive failures
/// - `Open -> HalfOpen` once `cooldown` has elapsed, applied by the next
///   observation or ask
/// - `HalfOpen -> Closed` when the single probe succeeds
/// - `HalfOpen -> Open` when the probe fails; cooldown restarts
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerState>,
    changed: Notify,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // Critical sections never panic midway, so a poisoned guard is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state. An open circuit whose cooldown has run out moves to
    /// `HalfOpen` here, so readers and the state gauge agree.
    pub fn state(&self) -> CircuitState {
        let mut s = self.lock();
        let half_opened = self.expire_cooldown(&mut s, Instant::now());
        let state = s.state;
        drop(s);
        if half_opened {
            self.changed.notify_waiters();
        }
        state
    }

    /// Consecutive failures counted while closed
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// True while open and still cooling down: new work is refused.
    pub fn rejects_new_work(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Future resolving on the next state change that may unblock deferred attempts.
    ///
    /// Obtain (and enable) it *before* calling [`CircuitBreaker::try_acquire`]
    /// so a wakeup between the two cannot be missed.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// Ask for permission to run one broker attempt.
    pub fn try_acquire(&self) -> Admission<'_> {
        let now = Instant::now();
        let mut s = self.lock();
        self.expire_cooldown(&mut s, now);

        match s.state {
            CircuitState::Closed => Admission::Granted(AttemptPermit::new(self, false)),
            CircuitState::Open => {
                let opened_at = s.opened_at.unwrap_or(now);
                Admission::Deferred(self.cooldown.saturating_sub(now - opened_at))
            }
            CircuitState::HalfOpen => {
                if s.probe_in_flight {
                    Admission::Deferred(self.cooldown)
                } else {
                    s.probe_in_flight = true;
                    Admission::Granted(AttemptPermit::new(self, true))
                }
            }
        }
    }

    /// `Open -> HalfOpen` when the cooldown has run out; true if it moved.
    fn expire_cooldown(&self, s: &mut BreakerState, now: Instant) -> bool {
        let elapsed = s
            .opened_at
            .is_some_and(|opened| now.saturating_duration_since(opened) >= self.cooldown);
        if s.state == CircuitState::Open && elapsed {
            s.probe_in_flight = false;
            self.transition(s, CircuitState::HalfOpen);
            return true;
        }
        false
    }

    fn on_success(&self, probe: bool) {
        let mut s = self.lock();
        match s.state {
            CircuitState::Closed => s.consecutive_failures = 0,
            CircuitState::HalfOpen if probe => {
                s.probe_in_flight = false;
                s.consecutive_failures = 0;
                s.opened_at = None;
                self.transition(&mut s, CircuitState::Closed);
                drop(s);
                self.changed.notify_waiters();
            }
            // Attempts admitted before the circuit opened do not steer it.
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let now = Instant::now();
        let mut s = self.lock();
        match s.state {
            CircuitState::Closed => {
                s.consecutive_failures = s.consecutive_failures.saturating_add(1);
                if s.consecutive_failures >= self.threshold {
                    s.opened_at = Some(now);
                    self.transition(&mut s, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if probe => {
                s.probe_in_flight = false;
                s.opened_at = Some(now);
                self.transition(&mut s, CircuitState::Open);
                drop(s);
                self.changed.notify_waiters();
            }
            _ => {}
        }
    }

    fn on_abandoned_probe(&self) {
        let mut s = self.lock();
        if s.state == CircuitState::HalfOpen && s.probe_in_flight {
            s.probe_in_flight = false;
            drop(s);
            self.changed.notify_waiters();
        }
    }

    fn transition(&self, s: &mut BreakerState, to: CircuitState) {
        let from = s.state;
        if from == to {
            return;
        }
        s.state = to;
        observability::record_circuit_transition(from, to);
        match to {
            CircuitState::Open => warn!(
                from = %from,
                consecutive_failures = s.consecutive_failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "Circuit opened"
            ),
            _ => info!(from = %from, to = %to, "Circuit state changed"),
        }
    }
}

/// Permission for exactly one broker attempt.
///
/// Report the result with [`AttemptPermit::succeed`] or
/// [`AttemptPermit::fail`]; dropping an unreported probe frees the probe slot.
#[derive(Debug)]
pub struct AttemptPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> AttemptPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// Whether this attempt is the half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// The broker answered
    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    /// The broker could not be reached / timed out
    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for AttemptPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.on_abandoned_probe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(10);

    fn granted(breaker: &CircuitBreaker) -> AttemptPermit<'_> {
        match breaker.try_acquire() {
            Admission::Granted(permit) => permit,
            Admission::Deferred(wait) => panic!("expected grant, deferred for {wait:?}"),
        }
    }

    fn trip(breaker: &CircuitBreaker, failures: u32) {
        for _ in 0..failures {
            granted(breaker).fail();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, COOLDOWN);
        trip(&breaker, 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 2);

        trip(&breaker, 1);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.rejects_new_work());
        assert!(matches!(breaker.try_acquire(), Admission::Deferred(d) if d == COOLDOWN));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, COOLDOWN);
        trip(&breaker, 2);
        granted(&breaker).succeed();
        trip(&breaker, 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_after_cooldown() {
        let breaker = CircuitBreaker::new(1, COOLDOWN);
        trip(&breaker, 1);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(matches!(breaker.try_acquire(), Admission::Deferred(d) if d == Duration::from_secs(6)));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.rejects_new_work());

        let probe = granted(&breaker);
        assert!(probe.is_probe());
        assert!(matches!(breaker.try_acquire(), Admission::Deferred(_)));

        probe.succeed();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(!granted(&breaker).is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_restarts_cooldown() {
        let breaker = CircuitBreaker::new(1, COOLDOWN);
        trip(&breaker, 1);
        tokio::time::advance(COOLDOWN).await;

        granted(&breaker).fail();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.rejects_new_work());

        tokio::time::advance(COOLDOWN - Duration::from_millis(1)).await;
        assert!(breaker.rejects_new_work());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!breaker.rejects_new_work());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_cooldown_is_applied_on_read() {
        let breaker = std::sync::Arc::new(CircuitBreaker::new(1, COOLDOWN));
        trip(&breaker, 1);

        let waiter = {
            let breaker = std::sync::Arc::clone(&breaker);
            tokio::spawn(async move { breaker.changed().await })
        };
        tokio::task::yield_now().await;

        tokio::time::advance(COOLDOWN).await;
        assert_eq!(breaker.lock().state, CircuitState::Open);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.lock().state, CircuitState::HalfOpen);
        waiter.await.unwrap();

        let probe = granted(&breaker);
        assert!(probe.is_probe());
        assert!(matches!(breaker.try_acquire(), Admission::Deferred(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_frees_slot() {
        let breaker = CircuitBreaker::new(1, COOLDOWN);
        trip(&breaker, 1);
        tokio::time::advance(COOLDOWN).await;

        drop(granted(&breaker));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(granted(&breaker).is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stragglers_do_not_steer_open_circuit() {
        let breaker = CircuitBreaker::new(2, COOLDOWN);
        let straggler_ok = granted(&breaker);
        let straggler_err = granted(&breaker);
        trip(&breaker, 2);

        straggler_ok.succeed();
        straggler_err.fail();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.rejects_new_work());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_resolution_wakes_waiters() {
        let breaker = std::sync::Arc::new(CircuitBreaker::new(1, COOLDOWN));
        trip(&breaker, 1);
        tokio::time::advance(COOLDOWN).await;
        let probe = granted(&breaker);

        let waiter = {
            let breaker = std::sync::Arc::clone(&breaker);
            tokio::spawn(async move {
                let notified = breaker.changed();
                tokio::pin!(notified);
                notified.as_mut().enable();
                assert!(matches!(breaker.try_acquire(), Admission::Deferred(_)));
                notified.await;
                breaker.state()
            })
        };

        tokio::task::yield_now().await;
        probe.succeed();
        assert_eq!(waiter.await.unwrap(), CircuitState::Closed);
    }
}

//! Circuit breaker for storage writes.
//!
//! When writes keep failing, the breaker trips and later uploads are refused
//! up front instead of piling onto a broken backend.
//!
//! # State Machine
//!
//! ```text
//!   Closed ──(window failure rate > threshold, volume reached)──> Open
//!   Open ──(reset_timeout elapsed, next call)──> HalfOpen
//!   HalfOpen ──(trial call succeeds)──> Closed
//!   HalfOpen ──(trial call fails or times out)──> Open
//! ```
//!
//! Only one trial call runs while half-open; concurrent callers are refused
//! as if the breaker were open.
//!
//! # Outcomes
//!
//! A call counts as a failure when it times out or returns an error whose
//! [`FailureClass::counts_as_failure`] is true. Errors that say nothing about
//! backend health (a client hanging up, an oversized upload) and calls whose
//! future is dropped before completion are not recorded at all.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use stowage_core::CircuitBreakerConfig;
use stowage_storage::StorageError;
use tokio::time::Instant;

use crate::source_wait::SourceWait;

#[derive(Debug)]
struct Elapsed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker is open")]
    Open,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Inner(E),
}

/// Decides whether an operation error says something about backend health.
pub trait FailureClass {
    fn counts_as_failure(&self) -> bool {
        true
    }
}

impl FailureClass for Infallible {}

impl FailureClass for std::io::Error {}

impl FailureClass for StorageError {
    fn counts_as_failure(&self) -> bool {
        self.is_backend_failure()
    }
}

/// Point-in-time view of the breaker for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub window_calls: u32,
    pub window_failures: u32,
    pub trial_in_flight: bool,
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    started: Instant,
    successes: u32,
    failures: u32,
}

/// Call outcomes over the last `window`, kept in fixed-span buckets.
#[derive(Debug)]
struct RollingWindow {
    window: Duration,
    bucket_span: Duration,
    buckets: VecDeque<Bucket>,
}

impl RollingWindow {
    fn new(window: Duration, buckets: u32) -> Self {
        let bucket_span = window / buckets.max(1);
        Self {
            window,
            bucket_span: if bucket_span.is_zero() { window } else { bucket_span },
            buckets: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.buckets.front() {
            if now.duration_since(front.started) >= self.window {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, now: Instant, success: bool) {
        self.prune(now);

        let start_new = match self.buckets.back() {
            Some(bucket) => now.duration_since(bucket.started) >= self.bucket_span,
            None => true,
        };
        if start_new {
            self.buckets.push_back(Bucket {
                started: now,
                successes: 0,
                failures: 0,
            });
        }

        if let Some(bucket) = self.buckets.back_mut() {
            if success {
                bucket.successes = bucket.successes.saturating_add(1);
            } else {
                bucket.failures = bucket.failures.saturating_add(1);
            }
        }
    }

    /// (calls, failures) still inside the window.
    fn totals(&mut self, now: Instant) -> (u32, u32) {
        self.prune(now);
        self.buckets.iter().fold((0, 0), |(calls, failures), b| {
            (
                calls.saturating_add(b.successes).saturating_add(b.failures),
                failures.saturating_add(b.failures),
            )
        })
    }

    fn clear(&mut self) {
        self.buckets.clear();
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    window: RollingWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Ignored,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let window = RollingWindow::new(config.rolling_window, config.rolling_buckets);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                trial_in_flight: false,
                window,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` under the breaker.
    ///
    /// Returns [`BreakerError::Open`] without polling `operation` when the
    /// breaker refuses the call, and [`BreakerError::Timeout`] when the
    /// operation does not finish within the configured timeout.
    pub async fn fire<F, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
        E: FailureClass,
    {
        self.fire_inner(operation, None).await
    }

    /// Like [`fire`](Self::fire), but time `operation` spends waiting on the
    /// source tracked by `wait` does not count towards the timeout.
    pub async fn fire_excluding<F, T, E>(
        &self,
        operation: F,
        wait: &SourceWait,
    ) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
        E: FailureClass,
    {
        self.fire_inner(operation, Some(wait)).await
    }

    async fn fire_inner<F, T, E>(
        &self,
        operation: F,
        wait: Option<&SourceWait>,
    ) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
        E: FailureClass,
    {
        let permit = match self.admit() {
            Some(permit) => permit,
            None => {
                tracing::debug!(breaker = %self.name, "Circuit open, call refused");
                return Err(BreakerError::Open);
            }
        };

        match self.bounded(operation, wait).await {
            Ok(Ok(value)) => {
                permit.settle(Outcome::Success);
                Ok(value)
            }
            Ok(Err(err)) => {
                let outcome = if err.counts_as_failure() {
                    Outcome::Failure
                } else {
                    Outcome::Ignored
                };
                permit.settle(outcome);
                Err(BreakerError::Inner(err))
            }
            Err(_) => {
                tracing::warn!(
                    breaker = %self.name,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "Protected call timed out"
                );
                permit.settle(Outcome::Failure);
                Err(BreakerError::Timeout(self.config.timeout))
            }
        }
    }

    /// Await `operation` for at most `timeout`, not counting source waits.
    async fn bounded<F: Future>(
        &self,
        operation: F,
        wait: Option<&SourceWait>,
    ) -> Result<F::Output, Elapsed> {
        let Some(wait) = wait else {
            return tokio::time::timeout(self.config.timeout, operation)
                .await
                .map_err(|_| Elapsed);
        };

        tokio::pin!(operation);
        let start = Instant::now();
        loop {
            // Moves forward for as long as the source keeps us waiting.
            let deadline = start + self.config.timeout + wait.waited();
            if deadline <= Instant::now() {
                return Err(Elapsed);
            }
            tokio::select! {
                biased;
                output = &mut operation => return Ok(output),
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    /// Whether a call would currently run on a closed circuit.
    ///
    /// Runs nothing and records nothing; in particular it never claims the
    /// half-open trial slot, so health checks cannot starve recovery.
    pub fn probe(&self) -> Result<(), BreakerError<Infallible>> {
        let inner = self.lock();
        match self.effective_state(&inner, Instant::now()) {
            CircuitState::Closed => Ok(()),
            CircuitState::Open | CircuitState::HalfOpen => Err(BreakerError::Open),
        }
    }

    /// Current state. An open breaker whose reset timeout has elapsed reports
    /// `HalfOpen`; the transition itself happens on the next call.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        self.effective_state(&inner, Instant::now())
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let mut inner = self.lock();
        let state = self.effective_state(&inner, now);
        let (window_calls, window_failures) = inner.window.totals(now);
        BreakerSnapshot {
            state,
            failure_count: inner.failure_count,
            window_calls,
            window_failures,
            trial_in_flight: inner.trial_in_flight,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every mutation is a single step under the lock, so the state is
        // consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_elapsed(&self, inner: &Inner, now: Instant) -> bool {
        inner
            .opened_at
            .map(|opened| now.duration_since(opened) >= self.config.reset_timeout)
            .unwrap_or(true)
    }

    fn effective_state(&self, inner: &Inner, now: Instant) -> CircuitState {
        match inner.state {
            CircuitState::Open if self.reset_elapsed(inner, now) => CircuitState::HalfOpen,
            state => state,
        }
    }

    fn admit(&self) -> Option<CallPermit<'_>> {
        let now = Instant::now();
        let mut inner = self.lock();

        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                if !self.reset_elapsed(&inner, now) {
                    return None;
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                tracing::info!(breaker = %self.name, "Circuit half-open, admitting trial call");
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return None;
                }
                inner.trial_in_flight = true;
                true
            }
        };

        Some(CallPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn record(&self, trial: bool, outcome: Outcome) {
        let now = Instant::now();
        let mut inner = self.lock();

        if trial {
            inner.trial_in_flight = false;
            match outcome {
                Outcome::Success => {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.opened_at = None;
                    inner.window.clear();
                    tracing::info!(breaker = %self.name, "Circuit closed after successful trial");
                }
                Outcome::Failure => {
                    inner.failure_count = inner.failure_count.saturating_add(1);
                    self.trip(&mut inner, now, "trial call failed");
                }
                Outcome::Ignored => {}
            }
            return;
        }

        match outcome {
            Outcome::Success => inner.window.record(now, true),
            Outcome::Failure => {
                inner.failure_count = inner.failure_count.saturating_add(1);
                inner.window.record(now, false);

                if inner.state == CircuitState::Closed {
                    let (calls, failures) = inner.window.totals(now);
                    let error_rate = failures as f64 * 100.0 / calls.max(1) as f64;
                    if calls >= self.config.volume_threshold
                        && error_rate > self.config.error_threshold_percentage
                    {
                        self.trip(&mut inner, now, "error threshold exceeded");
                    }
                }
            }
            Outcome::Ignored => {}
        }
    }

    fn trip(&self, inner: &mut Inner, now: Instant, reason: &str) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.trial_in_flight = false;
        tracing::warn!(
            breaker = %self.name,
            failure_count = inner.failure_count,
            reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
            reason,
            "Circuit opened"
        );
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Admission for one call. Settling records the outcome; dropping an
/// unsettled permit (cancelled call) only frees a held trial slot.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.record(self.trial, outcome);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record(self.trial, Outcome::Ignored);
        }
    }
}

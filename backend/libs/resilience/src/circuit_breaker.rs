/// Circuit Breaker with consecutive-failure tripping and bounded half-open trials
///
/// State transitions:
/// - Closed → Open: when consecutive failures reach `failure_threshold`
/// - Open → HalfOpen: on the first admission check after `recovery_timeout`
/// - HalfOpen → Closed: when `half_open_max_trials` trials succeed
/// - HalfOpen → Open: on any trial failure
///
/// Admission and outcome reporting go through one write lock per breaker.
/// Each admitted call holds a [`Permit`]; a permit dropped without reporting
/// gives its half-open trial slot back.
use crate::events::{EventListener, Listeners, ResilienceEvent};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Circuit is open, requests fail fast
    Open,
    /// Testing if service recovered, limited requests allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failure count to trigger circuit open
    pub failure_threshold: u32,
    /// Duration to wait before transitioning from Open to HalfOpen
    pub recovery_timeout: Duration,
    /// Trial calls admitted in HalfOpen; all must succeed to close the circuit
    pub half_open_max_trials: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_trials: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(
        failure_threshold: u32,
        recovery_timeout: Duration,
        half_open_max_trials: u32,
    ) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            half_open_max_trials,
        }
    }

    fn normalized(mut self) -> Self {
        self.failure_threshold = self.failure_threshold.max(1);
        self.half_open_max_trials = self.half_open_max_trials.max(1);
        self
    }
}

/// Admission denied; carries the time left until a trial call is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Circuit breaker is open - retry after {retry_after:?}")]
pub struct CircuitOpenError {
    pub retry_after: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error(transparent)]
    Open(#[from] CircuitOpenError),
    #[error("Call failed: {0}")]
    CallFailed(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

/// Point-in-time view of a breaker (for monitoring)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_successes: u32,
    pub half_open_in_flight: u32,
    pub since_last_transition: Duration,
}

struct CircuitBreakerState {
    current: CircuitState,
    /// Consecutive failures while Closed
    failure_count: u32,
    /// Successful trials in the current HalfOpen window
    half_open_successes: u32,
    /// Admitted trials that have not reported yet
    half_open_in_flight: u32,
    last_state_change: Instant,
    /// Bumped on every transition; stale permits are ignored
    generation: u64,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            current: CircuitState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            half_open_in_flight: 0,
            last_state_change: Instant::now(),
            generation: 0,
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitBreakerState>>,
    listeners: Listeners,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Shorthand for an anonymous breaker built from raw thresholds
pub fn new_circuit_breaker(
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_max_trials: u32,
) -> CircuitBreaker {
    CircuitBreaker::new(CircuitBreakerConfig::new(
        failure_threshold,
        recovery_timeout,
        half_open_max_trials,
    ))
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::named("default", config)
    }

    pub fn named(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: config.normalized(),
            state: Arc::new(RwLock::new(CircuitBreakerState::new())),
            listeners: Listeners::new(),
        }
    }

    /// Attach a listener. Call before handing out clones: clones made earlier
    /// keep the listener list they were created with.
    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub(crate) fn with_listeners(mut self, listeners: &Listeners) -> Self {
        self.listeners.extend(listeners);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute a future with circuit breaker protection
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;

        match f().await {
            Ok(result) => {
                permit.record_success();
                Ok(result)
            }
            Err(e) => {
                permit.record_failure();
                Err(CircuitBreakerError::CallFailed(e))
            }
        }
    }

    /// Admission check. Never blocks; a rejection is returned synchronously.
    pub fn try_acquire(&self) -> Result<Permit, CircuitOpenError> {
        let mut events = Vec::with_capacity(2);
        let decision = {
            let mut state = self.state.write();
            self.admit(&mut state, &mut events)
        };
        self.emit_all(&events);
        decision
    }

    fn admit(
        &self,
        state: &mut CircuitBreakerState,
        events: &mut Vec<ResilienceEvent>,
    ) -> Result<Permit, CircuitOpenError> {
        if state.current == CircuitState::Open {
            let elapsed = state.last_state_change.elapsed();
            if elapsed < self.config.recovery_timeout {
                let retry_after = self.config.recovery_timeout - elapsed;
                trace!(resource = %self.name, ?retry_after, "Circuit breaker rejected call");
                events.push(ResilienceEvent::CallRejected {
                    resource: self.name.clone(),
                    retry_after,
                });
                return Err(CircuitOpenError { retry_after });
            }
            info!(resource = %self.name, "Circuit breaker: Open → HalfOpen");
            self.transition(state, CircuitState::HalfOpen, events);
        }

        let trial = state.current == CircuitState::HalfOpen;
        if trial {
            let used = state.half_open_successes + state.half_open_in_flight;
            if used >= self.config.half_open_max_trials {
                trace!(resource = %self.name, "Circuit breaker trial slots exhausted");
                events.push(ResilienceEvent::CallRejected {
                    resource: self.name.clone(),
                    retry_after: Duration::ZERO,
                });
                return Err(CircuitOpenError {
                    retry_after: Duration::ZERO,
                });
            }
            state.half_open_in_flight += 1;
        }

        trace!(resource = %self.name, state = %state.current, "Circuit breaker admitted call");
        events.push(ResilienceEvent::CallAdmitted {
            resource: self.name.clone(),
            state: state.current,
        });

        Ok(Permit {
            breaker: self.clone(),
            generation: state.generation,
            trial,
            settled: false,
        })
    }

    fn settle(&self, generation: u64, trial: bool, outcome: Option<bool>) {
        let mut events = Vec::with_capacity(1);
        {
            let mut state = self.state.write();
            if state.generation != generation {
                // Outcome from a window the breaker has already left
                return;
            }
            if trial {
                state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
            }
            match outcome {
                Some(true) => self.on_success(&mut state, &mut events),
                Some(false) => self.on_failure(&mut state, &mut events),
                None => {}
            }
        }
        self.emit_all(&events);
    }

    fn on_success(&self, state: &mut CircuitBreakerState, events: &mut Vec<ResilienceEvent>) {
        match state.current {
            CircuitState::Closed => state.failure_count = 0,
            CircuitState::HalfOpen => {
                state.half_open_successes += 1;
                if state.half_open_successes >= self.config.half_open_max_trials {
                    info!(resource = %self.name, "Circuit breaker: HalfOpen → Closed");
                    self.transition(state, CircuitState::Closed, events);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, state: &mut CircuitBreakerState, events: &mut Vec<ResilienceEvent>) {
        match state.current {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    warn!(
                        resource = %self.name,
                        failures = state.failure_count,
                        "Circuit breaker: Closed → Open"
                    );
                    self.transition(state, CircuitState::Open, events);
                }
            }
            CircuitState::HalfOpen => {
                warn!(resource = %self.name, "Circuit breaker: HalfOpen → Open (trial failed)");
                self.transition(state, CircuitState::Open, events);
            }
            CircuitState::Open => {
                // Already open, nothing to do
            }
        }
    }

    fn transition(
        &self,
        state: &mut CircuitBreakerState,
        to: CircuitState,
        events: &mut Vec<ResilienceEvent>,
    ) {
        let from = state.current;
        state.current = to;
        state.failure_count = 0;
        state.half_open_successes = 0;
        state.half_open_in_flight = 0;
        state.last_state_change = Instant::now();
        state.generation += 1;

        events.push(ResilienceEvent::StateTransition {
            resource: self.name.clone(),
            from,
            to,
        });
    }

    fn emit_all(&self, events: &[ResilienceEvent]) {
        for event in events {
            self.listeners.emit(event);
        }
    }

    /// Get current circuit state (for monitoring)
    ///
    /// Reports the stored state: an Open breaker whose recovery timeout has
    /// elapsed still reads Open until the next admission check.
    pub fn state(&self) -> CircuitState {
        self.state.read().current
    }

    pub fn failure_count(&self) -> u32 {
        self.state.read().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.read();
        BreakerSnapshot {
            name: self.name.to_string(),
            state: state.current,
            failure_count: state.failure_count,
            half_open_successes: state.half_open_successes,
            half_open_in_flight: state.half_open_in_flight,
            since_last_transition: state.last_state_change.elapsed(),
        }
    }

    /// Force the breaker back to Closed. Outstanding permits become stale.
    pub fn reset(&self) {
        let mut events = Vec::with_capacity(1);
        {
            let mut state = self.state.write();
            if state.current == CircuitState::Closed {
                state.failure_count = 0;
                return;
            }
            info!(resource = %self.name, from = %state.current, "Circuit breaker manually reset");
            self.transition(&mut state, CircuitState::Closed, &mut events);
        }
        self.emit_all(&events);
    }
}

/// Admission token for one call. Report the outcome exactly once; dropping it
/// unreported (e.g. the caller was cancelled) only frees the trial slot.
#[must_use = "report the call outcome through the permit"]
pub struct Permit {
    breaker: CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl Permit {
    pub fn record_success(self) {
        self.record(true)
    }

    pub fn record_failure(self) {
        self.record(false)
    }

    pub fn record(mut self, success: bool) {
        self.settled = true;
        self.breaker.settle(self.generation, self.trial, Some(success));
    }

    /// Whether this permit is a half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.settle(self.generation, true, None);
        }
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("breaker", &self.breaker.name)
            .field("generation", &self.generation)
            .field("trial", &self.trial)
            .finish()
    }
}

//! Composed resilient call path.
//!
//! Layers wrap the operation as
//! `Fallback( Retry( CircuitBreaker-gate( Timeout( operation ) ) ) )`:
//! the breaker is consulted before every attempt, every attempt outcome is
//! reported back to it, and the fallback only runs once the breaker refuses
//! admission or the retry budget is spent.

use crate::circuit_breaker::{CircuitBreaker, CircuitOpenError};
use crate::events::{EventListener, Listeners, ResilienceEvent};
use crate::fallback::{Fallback, FallbackReason};
use crate::retry::{FailureKind, RetryError, RetryPolicy, RetryRun};
use crate::timeout::{with_timeout, TimeoutError};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Failure of one admitted attempt
#[derive(Debug, thiserror::Error)]
pub enum AttemptError<E> {
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error("Operation failed: {0}")]
    Failed(E),
}

#[derive(Debug, thiserror::Error)]
pub enum ResilienceError<E> {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error("Operation failed: {0}")]
    Failed(E),
    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        attempts: u32,
        last_error: AttemptError<E>,
    },
    #[error("Resilient call cancelled")]
    Cancelled,
    #[error("Fallback failed: {0}")]
    FallbackFailed(E),
}

impl<E> From<AttemptError<E>> for ResilienceError<E> {
    fn from(err: AttemptError<E>) -> Self {
        match err {
            AttemptError::Timeout(t) => Self::Timeout(t),
            AttemptError::Failed(e) => Self::Failed(e),
        }
    }
}

impl<E> ResilienceError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::MaxRetriesExceeded {
                    last_error: AttemptError::Timeout(_),
                    ..
                }
        )
    }
}

/// Outcome of one pass through the breaker gate
enum Step<E> {
    Rejected(CircuitOpenError),
    Attempt(AttemptError<E>),
}

/// Builder for a call guarded by any subset of breaker, retry, timeout and
/// fallback. Reusable: `call` takes `&self`.
pub struct ResilientCall<T, E> {
    resource: Option<Arc<str>>,
    breaker: Option<CircuitBreaker>,
    retry: Option<RetryPolicy<E>>,
    timeout: Option<Duration>,
    fallback: Option<Fallback<T, E>>,
    cancel: Option<CancellationToken>,
    listeners: Listeners,
}

impl<T, E> Default for ResilientCall<T, E> {
    fn default() -> Self {
        Self {
            resource: None,
            breaker: None,
            retry: None,
            timeout: None,
            fallback: None,
            cancel: None,
            listeners: Listeners::new(),
        }
    }
}

impl<T, E> fmt::Debug for ResilientCall<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientCall")
            .field("resource", &self.resource_name())
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("fallback", &self.fallback.is_some())
            .field("listeners", &self.listeners)
            .finish()
    }
}

impl<T, E> ResilientCall<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label used in events and logs; defaults to the breaker's name
    pub fn resource(mut self, name: impl Into<Arc<str>>) -> Self {
        self.resource = Some(name.into());
        self
    }

    pub fn breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy<E>) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Deadline for each individual attempt
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn fallback(mut self, fallback: Fallback<T, E>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Abort attempts and backoff waits once `token` is cancelled
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Receives the retry and fallback events of this call, plus the
    /// admission and transition events its breaker raises while serving it
    pub fn listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub(crate) fn listeners(mut self, listeners: &Listeners) -> Self {
        self.listeners.extend(listeners);
        self
    }

    fn resource_name(&self) -> Arc<str> {
        match (&self.resource, &self.breaker) {
            (Some(name), _) => name.clone(),
            (None, Some(breaker)) => Arc::from(breaker.name()),
            (None, None) => Arc::from("resilient"),
        }
    }
}

impl<T, E> ResilientCall<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub async fn call<F, Fut>(&self, mut op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let resource = self.resource_name();
        let single;
        let policy = match &self.retry {
            Some(policy) => policy,
            None => {
                single = RetryPolicy::single_attempt();
                &single
            }
        };

        // Call listeners also observe this call's admissions and transitions
        let breaker = self
            .breaker
            .as_ref()
            .map(|breaker| breaker.clone().with_listeners(&self.listeners));
        let breaker = breaker.as_ref();
        let deadline = self.timeout;

        let attempt = || {
            // Admission happens before the operation is even constructed
            let admission = match breaker {
                Some(breaker) => breaker.try_acquire().map(Some),
                None => Ok(None),
            };
            let call = admission.map(|permit| (permit, op()));

            async move {
                let (permit, fut) = match call {
                    Ok(admitted) => admitted,
                    Err(open) => return Err(Step::Rejected(open)),
                };
                let outcome = match deadline {
                    Some(duration) => match with_timeout(duration, fut).await {
                        Ok(result) => result.map_err(AttemptError::Failed),
                        Err(elapsed) => Err(AttemptError::Timeout(elapsed)),
                    },
                    None => fut.await.map_err(AttemptError::Failed),
                };
                if let Some(permit) = permit {
                    permit.record(outcome.is_ok());
                }
                outcome.map_err(Step::Attempt)
            }
        };

        // A rejected attempt never ran: it ends the sequence without being counted
        let classify = |step: &Step<E>| match step {
            Step::Rejected(_) => None,
            Step::Attempt(AttemptError::Timeout(_)) => Some(FailureKind::Timeout),
            Step::Attempt(AttemptError::Failed(e)) => Some(policy.classify(e)),
        };

        let result = RetryRun::new(policy, resource.clone())
            .listeners(&self.listeners)
            .cancellation(self.cancel.as_ref())
            .run(attempt, classify)
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(RetryError::NonRetryable { error, .. }) => match error {
                Step::Rejected(open) => self.rejected(&resource, open).await,
                Step::Attempt(err) => Err(err.into()),
            },
            Err(RetryError::MaxRetriesExceeded {
                attempts,
                last_error,
            }) => match last_error {
                Step::Rejected(open) => self.rejected(&resource, open).await,
                Step::Attempt(err) => self.exhausted(&resource, attempts, err).await,
            },
            Err(RetryError::Cancelled { .. }) => Err(ResilienceError::Cancelled),
        }
    }

    async fn rejected(
        &self,
        resource: &Arc<str>,
        open: CircuitOpenError,
    ) -> Result<T, ResilienceError<E>> {
        let reason = FallbackReason::CircuitOpen {
            retry_after: open.retry_after,
        };
        match self.invoke_fallback(resource, reason).await {
            Some(outcome) => outcome,
            None => Err(ResilienceError::CircuitOpen(open)),
        }
    }

    async fn exhausted(
        &self,
        resource: &Arc<str>,
        attempts: u32,
        last_error: AttemptError<E>,
    ) -> Result<T, ResilienceError<E>> {
        let reason = FallbackReason::RetriesExhausted { attempts };
        match self.invoke_fallback(resource, reason).await {
            Some(outcome) => outcome,
            // Without a retry layer there is no retry error to report
            None if self.retry.is_none() => Err(last_error.into()),
            None => Err(ResilienceError::MaxRetriesExceeded {
                attempts,
                last_error,
            }),
        }
    }

    async fn invoke_fallback(
        &self,
        resource: &Arc<str>,
        reason: FallbackReason,
    ) -> Option<Result<T, ResilienceError<E>>> {
        let fallback = self.fallback.as_ref()?;

        info!(resource = %resource, reason = reason.as_str(), "Invoking fallback");
        self.listeners.emit(&ResilienceEvent::FallbackInvoked {
            resource: resource.clone(),
            reason,
        });

        Some(fallback.invoke(reason).await.map_err(ResilienceError::FallbackFailed))
    }
}

/// Run `op` through whichever protective layers are supplied.
///
/// Only the breaker's own listeners (see [`CircuitBreaker::with_listener`])
/// observe events here; build a [`ResilientCall`] to attach call listeners.
pub async fn resilient<F, Fut, T, E>(
    op: F,
    breaker: Option<&CircuitBreaker>,
    retry: Option<&RetryPolicy<E>>,
    timeout: Option<Duration>,
    fallback: Option<&Fallback<T, E>>,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: Send + 'static,
    E: Send + 'static,
{
    let mut call = ResilientCall::new();
    if let Some(breaker) = breaker {
        call = call.breaker(breaker.clone());
    }
    if let Some(policy) = retry {
        call = call.retry(policy.clone());
    }
    if let Some(duration) = timeout {
        call = call.timeout(duration);
    }
    if let Some(fallback) = fallback {
        call = call.fallback(fallback.clone());
    }
    call.call(op).await
}

/// Retry executor with pluggable backoff, jitter and failure classification
use crate::backoff::{apply_jitter, clamp_fraction, Backoff};
use crate::events::{Listeners, ResilienceEvent};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a failed attempt should be treated by the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient, try again
    Retryable,
    /// Give up immediately
    Terminal,
    /// Attempt overran its deadline; retried iff `retry_on_timeout`
    Timeout,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retryable => "retryable",
            Self::Terminal => "terminal",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Upper bound on invocations, including the first one
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Extra ± randomization applied to each computed delay (0.0 - 1.0)
    pub jitter_fraction: f64,
    pub retry_on_timeout: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            jitter_fraction: 0.0,
            retry_on_timeout: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: E },
    #[error("Non-retryable failure on attempt {attempt}: {error}")]
    NonRetryable { attempt: u32, error: E },
    #[error("Retry cancelled after {attempts} attempts")]
    Cancelled { attempts: u32, last_error: Option<E> },
}

impl<E> RetryError<E> {
    /// Number of invocations that were started
    pub fn attempts(&self) -> u32 {
        match self {
            Self::MaxRetriesExceeded { attempts, .. } | Self::Cancelled { attempts, .. } => {
                *attempts
            }
            Self::NonRetryable { attempt, .. } => *attempt,
        }
    }

    /// The most recent underlying failure, if any attempt completed
    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::MaxRetriesExceeded { last_error, .. } => Some(last_error),
            Self::NonRetryable { error, .. } => Some(error),
            Self::Cancelled { last_error, .. } => last_error,
        }
    }
}

type Classifier<E> = Arc<dyn Fn(&E) -> FailureKind + Send + Sync>;

/// Immutable retry configuration plus an error classifier. Cheap to clone.
pub struct RetryPolicy<E> {
    config: RetryConfig,
    classifier: Classifier<E>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("classifier", &"<fn>")
            .finish()
    }
}

/// Shorthand matching [`RetryPolicy::new`]
pub fn new_retry_policy<E, C>(
    max_attempts: u32,
    backoff: Backoff,
    classifier: C,
    jitter_fraction: f64,
) -> RetryPolicy<E>
where
    C: Fn(&E) -> FailureKind + Send + Sync + 'static,
{
    RetryPolicy::new(max_attempts, backoff, classifier, jitter_fraction)
}

impl<E> RetryPolicy<E> {
    pub fn new<C>(max_attempts: u32, backoff: Backoff, classifier: C, jitter_fraction: f64) -> Self
    where
        C: Fn(&E) -> FailureKind + Send + Sync + 'static,
    {
        Self::from_config(
            RetryConfig {
                max_attempts,
                backoff,
                jitter_fraction,
                ..Default::default()
            },
            classifier,
        )
    }

    pub fn from_config<C>(mut config: RetryConfig, classifier: C) -> Self
    where
        C: Fn(&E) -> FailureKind + Send + Sync + 'static,
    {
        config.max_attempts = config.max_attempts.max(1);
        config.jitter_fraction = clamp_fraction(config.jitter_fraction);
        Self {
            config,
            classifier: Arc::new(classifier),
        }
    }

    /// Every failure is retryable
    pub fn retry_all(config: RetryConfig) -> Self {
        Self::from_config(config, |_: &E| FailureKind::Retryable)
    }

    /// One attempt, no waiting. Used when retry is disabled but the same
    /// call path is kept.
    pub fn single_attempt() -> Self {
        Self::retry_all(RetryConfig {
            max_attempts: 1,
            backoff: Backoff::fixed(Duration::ZERO),
            ..Default::default()
        })
    }

    pub fn retry_on_timeout(mut self, enabled: bool) -> Self {
        self.config.retry_on_timeout = enabled;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn classify(&self, error: &E) -> FailureKind {
        (self.classifier)(error)
    }

    /// Wait inserted after the given failed attempt, jitter included.
    ///
    /// A single jitter pass is applied using the larger of the policy's
    /// `jitter_fraction` and the backoff strategy's own fraction.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let fraction = self
            .config
            .jitter_fraction
            .max(self.config.backoff.jitter_fraction());
        apply_jitter(self.config.backoff.delay(attempt), fraction)
    }

    pub(crate) fn should_retry(&self, kind: FailureKind) -> bool {
        match kind {
            FailureKind::Retryable => true,
            FailureKind::Terminal => false,
            FailureKind::Timeout => self.config.retry_on_timeout,
        }
    }

    /// Execute `f` with retry logic
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        RetryRun::new(self, "retry").run(f, |e| Some(self.classify(e))).await
    }

    /// Like [`execute`](Self::execute), but cancelling `token` aborts the
    /// in-progress attempt or backoff wait.
    pub async fn execute_with_cancellation<F, Fut, T>(
        &self,
        f: F,
        token: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        RetryRun::new(self, "retry")
            .cancellation(Some(token))
            .run(f, |e| Some(self.classify(e)))
            .await
    }
}

/// One drive of the retry loop. The composition layer reuses it with its own
/// error type and classification.
pub(crate) struct RetryRun<'a, P> {
    policy: &'a RetryPolicy<P>,
    resource: Arc<str>,
    listeners: Option<&'a Listeners>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a, P> RetryRun<'a, P> {
    pub(crate) fn new(policy: &'a RetryPolicy<P>, resource: impl Into<Arc<str>>) -> Self {
        Self {
            policy,
            resource: resource.into(),
            listeners: None,
            cancel: None,
        }
    }

    pub(crate) fn listeners(mut self, listeners: &'a Listeners) -> Self {
        self.listeners = Some(listeners);
        self
    }

    pub(crate) fn cancellation(mut self, token: Option<&'a CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    fn emit(&self, event: ResilienceEvent) {
        if let Some(listeners) = self.listeners {
            listeners.emit(&event);
        }
    }

    /// Drive the loop. `classify` returning `None` marks a failure raised
    /// before the operation ran (e.g. a breaker rejection): the loop stops at
    /// once and the failure is neither counted nor reported as an attempt.
    pub(crate) async fn run<F, Fut, T, Err, C>(
        &self,
        mut f: F,
        classify: C,
    ) -> Result<T, RetryError<Err>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Err>>,
        C: Fn(&Err) -> Option<FailureKind>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;
        let mut last_error = None;

        loop {
            // Checked before `f()` so a cancelled run never starts another attempt
            if self.cancel.is_some_and(|token| token.is_cancelled()) {
                debug!(resource = %self.resource, attempts = attempt, "Retry cancelled");
                return Err(RetryError::Cancelled {
                    attempts: attempt,
                    last_error: last_error.take(),
                });
            }

            attempt += 1;

            let outcome = match self.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(resource = %self.resource, attempt, "Attempt cancelled");
                        return Err(RetryError::Cancelled { attempts: attempt, last_error: None });
                    }
                    outcome = f() => outcome,
                },
                None => f().await,
            };

            let error = match outcome {
                Ok(result) => {
                    self.emit(ResilienceEvent::AttemptSucceeded {
                        resource: self.resource.clone(),
                        attempt,
                    });
                    return Ok(result);
                }
                Err(e) => e,
            };

            let Some(kind) = classify(&error) else {
                debug!(
                    resource = %self.resource,
                    attempts = attempt - 1,
                    "Attempt refused before running"
                );
                return Err(RetryError::NonRetryable {
                    attempt: attempt - 1,
                    error,
                });
            };
            self.emit(ResilienceEvent::AttemptFailed {
                resource: self.resource.clone(),
                attempt,
                kind,
            });

            if !self.policy.should_retry(kind) {
                debug!(
                    resource = %self.resource,
                    attempt,
                    kind = kind.as_str(),
                    "Failure is not retryable, aborting"
                );
                return Err(RetryError::NonRetryable { attempt, error });
            }

            if attempt >= max_attempts {
                warn!(resource = %self.resource, attempts = attempt, "Max attempts reached");
                return Err(RetryError::MaxRetriesExceeded {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                resource = %self.resource,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retry attempt {}/{}, waiting {:?}",
                attempt + 1,
                max_attempts,
                delay
            );
            self.emit(ResilienceEvent::RetryScheduled {
                resource: self.resource.clone(),
                attempt,
                delay,
            });

            if let Some(token) = self.cancel {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(resource = %self.resource, attempt, "Backoff wait cancelled");
                        return Err(RetryError::Cancelled {
                            attempts: attempt,
                            last_error: Some(error),
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            } else {
                tokio::time::sleep(delay).await;
            }
            last_error = Some(error);
        }
    }
}

/// Timeout guard for a single attempt
///
/// On expiry the guard stops waiting and drops the attempt's future. Work the
/// future already handed off elsewhere (spawned tasks, blocking threads) is
/// not stopped; operations that need to be interruptible should watch a
/// [`CancellationToken`].
use crate::compose::ResilienceError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub duration: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Operation timed out after {duration:?}")]
pub struct TimeoutError {
    pub duration: Duration,
}

/// Outcome of [`with_deadline`] when the attempt did not finish
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeadlineError {
    #[error(transparent)]
    Elapsed(#[from] TimeoutError),
    #[error("Operation cancelled")]
    Cancelled,
}

/// Execute a future with timeout
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Execute a fallible future with timeout, keeping overrun distinct from the
/// operation's own failure
pub async fn with_timeout_result<F, T, E>(
    duration: Duration,
    future: F,
) -> Result<T, ResilienceError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(duration, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(ResilienceError::Failed(e)),
        Err(_) => Err(ResilienceError::Timeout(TimeoutError { duration })),
    }
}

/// Execute a future under a deadline that an external token can cut short
pub async fn with_deadline<F, T>(
    duration: Duration,
    token: &CancellationToken,
    future: F,
) -> Result<T, DeadlineError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(DeadlineError::Cancelled),
        outcome = with_timeout(duration, future) => outcome.map_err(DeadlineError::from),
    }
}

impl TimeoutConfig {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub async fn run<F, T>(&self, future: F) -> Result<T, TimeoutError>
    where
        F: Future<Output = T>,
    {
        with_timeout(self.duration, future).await
    }
}

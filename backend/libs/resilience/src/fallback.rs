/// Degraded-mode result supplier for an exhausted call path
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Why the composed call fell back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FallbackReason {
    /// The breaker refused admission
    CircuitOpen { retry_after: Duration },
    /// Every allowed attempt failed
    RetriesExhausted { attempts: u32 },
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

type Handler<T, E> = Arc<dyn Fn(FallbackReason) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// Substitute operation. Its own failure is returned to the caller as-is;
/// there is no second-level fallback.
pub struct Fallback<T, E> {
    handler: Handler<T, E>,
}

impl<T, E> Clone for Fallback<T, E> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Fallback<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fallback").finish_non_exhaustive()
    }
}

impl<T, E> Fallback<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(FallbackReason) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |reason| -> BoxFuture<'static, Result<T, E>> {
                Box::pin(f(reason))
            }),
        }
    }

    /// Always answer with a clone of `value`
    pub fn value(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::new(move |_| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    pub async fn invoke(&self, reason: FallbackReason) -> Result<T, E> {
        (self.handler)(reason).await
    }
}

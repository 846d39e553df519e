//! Observable events emitted by breakers, retry loops and the composition layer.
//!
//! The toolkit never talks to a concrete sink. Anything that wants to count,
//! log or export these events implements [`EventListener`] and is attached to a
//! breaker, a [`ResilientCall`](crate::compose::ResilientCall) or a
//! [`ResilienceRegistry`](crate::registry::ResilienceRegistry).

use crate::circuit_breaker::CircuitState;
use crate::fallback::FallbackReason;
use crate::retry::FailureKind;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ResilienceEvent {
    /// Breaker let a call through
    CallAdmitted {
        resource: Arc<str>,
        state: CircuitState,
    },
    /// Breaker refused a call without invoking it
    CallRejected {
        resource: Arc<str>,
        retry_after: Duration,
    },
    StateTransition {
        resource: Arc<str>,
        from: CircuitState,
        to: CircuitState,
    },
    AttemptSucceeded {
        resource: Arc<str>,
        attempt: u32,
    },
    AttemptFailed {
        resource: Arc<str>,
        attempt: u32,
        kind: FailureKind,
    },
    /// A retry will be attempted after `delay`
    RetryScheduled {
        resource: Arc<str>,
        attempt: u32,
        delay: Duration,
    },
    FallbackInvoked {
        resource: Arc<str>,
        reason: FallbackReason,
    },
}

impl ResilienceEvent {
    pub fn resource(&self) -> &str {
        match self {
            Self::CallAdmitted { resource, .. }
            | Self::CallRejected { resource, .. }
            | Self::StateTransition { resource, .. }
            | Self::AttemptSucceeded { resource, .. }
            | Self::AttemptFailed { resource, .. }
            | Self::RetryScheduled { resource, .. }
            | Self::FallbackInvoked { resource, .. } => resource,
        }
    }
}

/// Subscriber for [`ResilienceEvent`]s.
///
/// Called synchronously on the caller's task, never while a breaker lock is
/// held. Implementations should be cheap and must not block.
#[cfg_attr(test, mockall::automock)]
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ResilienceEvent);
}

impl<F> EventListener for F
where
    F: Fn(&ResilienceEvent) + Send + Sync,
{
    fn on_event(&self, event: &ResilienceEvent) {
        self(event)
    }
}

/// Fan-out list of listeners, shared by clones
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<Vec<Arc<dyn EventListener>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, listener: Arc<dyn EventListener>) {
        Arc::make_mut(&mut self.inner).push(listener);
    }

    /// Append the listeners of `other` that are not already attached
    pub fn extend(&mut self, other: &Listeners) {
        let missing: Vec<_> = other
            .inner
            .iter()
            .filter(|listener| !self.inner.iter().any(|held| Arc::ptr_eq(held, listener)))
            .cloned()
            .collect();
        if missing.is_empty() {
            return;
        }
        Arc::make_mut(&mut self.inner).extend(missing);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn emit(&self, event: &ResilienceEvent) {
        for listener in self.inner.iter() {
            listener.on_event(event);
        }
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.inner.len())
            .finish()
    }
}

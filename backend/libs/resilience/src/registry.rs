//! Named resource registry.
//!
//! Owned by whoever wires up the process (no global singleton): create it at
//! startup, register each dependency once, then look breakers and
//! preconfigured call builders up by name.

use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::compose::ResilientCall;
use crate::events::{EventListener, Listeners};
use crate::presets::ServiceConfig;
use crate::retry::{FailureKind, RetryPolicy};
use crate::settings::{ConfigError, ResilienceSettings};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown resilience resource: {0}")]
    UnknownResource(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

struct Entry {
    config: ServiceConfig,
    breaker: CircuitBreaker,
}

#[derive(Default)]
pub struct ResilienceRegistry {
    entries: DashMap<String, Entry>,
    listeners: Listeners,
}

impl std::fmt::Debug for ResilienceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceRegistry")
            .field("resources", &self.names())
            .field("listeners", &self.listeners)
            .finish()
    }
}

impl ResilienceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener shared by every breaker and call registered afterwards
    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Register (or replace) a resource. Replacing starts a fresh breaker;
    /// handles to the old one keep working but are no longer tracked.
    pub fn register(&self, name: impl Into<String>, config: ServiceConfig) -> CircuitBreaker {
        let name = name.into();
        let breaker = CircuitBreaker::named(name.as_str(), config.circuit_breaker.clone())
            .with_listeners(&self.listeners);

        info!(
            resource = %name,
            failure_threshold = config.circuit_breaker.failure_threshold,
            timeout_ms = config.timeout.duration.as_millis() as u64,
            retry = config.retry.is_some(),
            "Registered resilience resource"
        );

        self.entries.insert(
            name,
            Entry {
                config,
                breaker: breaker.clone(),
            },
        );
        breaker
    }

    /// Register a resource from `{prefix}*` environment variables
    pub fn register_from_env(
        &self,
        name: impl Into<String>,
        prefix: &str,
    ) -> Result<CircuitBreaker, RegistryError> {
        let config = ResilienceSettings::from_env(prefix)?.into_service_config()?;
        Ok(self.register(name, config))
    }

    pub fn breaker(&self, name: &str) -> Option<CircuitBreaker> {
        self.entries.get(name).map(|entry| entry.breaker.clone())
    }

    pub fn config(&self, name: &str) -> Option<ServiceConfig> {
        self.entries.get(name).map(|entry| entry.config.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Call builder wired with the resource's breaker, timeout and retry
    /// settings. Every failure is retryable; use [`call_with`](Self::call_with)
    /// to classify errors.
    pub fn call<T, E>(&self, name: &str) -> Result<ResilientCall<T, E>, RegistryError> {
        self.call_with(name, |_: &E| FailureKind::Retryable)
    }

    pub fn call_with<T, E, C>(
        &self,
        name: &str,
        classifier: C,
    ) -> Result<ResilientCall<T, E>, RegistryError>
    where
        C: Fn(&E) -> FailureKind + Send + Sync + 'static,
    {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| RegistryError::UnknownResource(name.to_string()))?;

        let mut call = ResilientCall::new()
            .resource(name)
            .breaker(entry.breaker.clone())
            .timeout(entry.config.timeout.duration)
            .listeners(&self.listeners);
        if let Some(retry) = &entry.config.retry {
            call = call.retry(RetryPolicy::from_config(retry.clone(), classifier));
        }
        Ok(call)
    }

    pub fn reset(&self, name: &str) -> Result<(), RegistryError> {
        let breaker = self
            .breaker(name)
            .ok_or_else(|| RegistryError::UnknownResource(name.to_string()))?;
        breaker.reset();
        Ok(())
    }

    /// Breaker snapshots sorted by resource name
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .entries
            .iter()
            .map(|entry| entry.breaker.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}

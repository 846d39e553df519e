/// Fault-tolerance primitives for calls to unreliable dependencies
///
/// This library provides:
/// - **Circuit Breaker**: Fails fast while a dependency is down and probes for recovery
/// - **Retry**: Bounded attempts with fixed, linear or exponential backoff and jitter
/// - **Timeout**: Per-attempt deadlines, distinguishable from functional failures
/// - **Fallback**: Degraded result once the protected path is exhausted
/// - **Composition**: `Fallback(Retry(CircuitBreaker(Timeout(op))))` in one call
/// - **Registry**: Named resources with shared breakers and preset configurations
/// - **Events**: Hooks for metrics and logging without tying the toolkit to a sink
///
/// # Example: Composed call with fallback
///
/// ```rust,no_run
/// use resilience::{Backoff, CircuitBreaker, Fallback, ResilientCall, RetryPolicy, presets};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::grpc_config();
///     let breaker = CircuitBreaker::named("feed-service", config.circuit_breaker);
///
///     let call = ResilientCall::new()
///         .breaker(breaker)
///         .retry(RetryPolicy::retry_all(config.retry.unwrap_or_default()))
///         .timeout(config.timeout.duration)
///         .fallback(Fallback::value(Vec::<String>::new()));
///
///     let feed = call
///         .call(|| async {
///             // Your gRPC call here
///             Ok::<_, String>(vec!["post-1".to_string()])
///         })
///         .await;
/// }
/// ```
///
/// # Example: Query with timeout
///
/// ```rust,no_run
/// use resilience::{presets, timeout::with_timeout_result};
///
/// #[tokio::main]
/// async fn main() {
///     let config = presets::database_config();
///
///     let result = with_timeout_result(
///         config.timeout.duration,
///         async {
///             // Your database query
///             Ok::<_, String>(())
///         }
///     ).await;
/// }
/// ```

pub mod backoff;
pub mod circuit_breaker;
pub mod classify;
pub mod compose;
pub mod events;
pub mod fallback;
pub mod layer;
pub mod metrics;
pub mod presets;
pub mod registry;
pub mod retry;
pub mod settings;
pub mod timeout;

// Re-export main types for convenience
pub use backoff::Backoff;
pub use circuit_breaker::{
    new_circuit_breaker, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerError, CircuitOpenError, CircuitState, Permit,
};
pub use compose::{resilient, AttemptError, ResilienceError, ResilientCall};
pub use events::{EventListener, Listeners, ResilienceEvent};
pub use fallback::{Fallback, FallbackReason};
pub use layer::{CircuitBreakerLayer, CircuitBreakerService};
pub use metrics::PrometheusListener;
pub use presets::{
    database_config, grpc_config, http_external_config, kafka_config, object_storage_config,
    redis_config, ServiceConfig,
};
pub use registry::{RegistryError, ResilienceRegistry};
pub use retry::{new_retry_policy, FailureKind, RetryConfig, RetryError, RetryPolicy};
pub use settings::{ConfigError, ResilienceSettings};
pub use timeout::{with_deadline, with_timeout, with_timeout_result, TimeoutConfig, TimeoutError};
pub use tokio_util::sync::CancellationToken;

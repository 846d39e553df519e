/// Preset configurations for common dependency types
use crate::backoff::Backoff;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryConfig;
use crate::timeout::TimeoutConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration bundle for one protected resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub timeout: TimeoutConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: Option<RetryConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        grpc_config()
    }
}

fn jittered(base: Duration, max: Duration) -> Backoff {
    Backoff::exponential_with_jitter(base, 0.3).with_max(max)
}

/// gRPC service calls (internal microservices)
///
/// - Timeout: 30s (long enough for complex operations)
/// - Circuit breaker: 5 failures, 60s cooldown, 2 trial calls
/// - Retry: 3 attempts with jittered exponential backoff
pub fn grpc_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(30),
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_trials: 2,
        },
        retry: Some(RetryConfig {
            max_attempts: 3,
            backoff: jittered(Duration::from_millis(100), Duration::from_secs(5)),
            jitter_fraction: 0.0,
            retry_on_timeout: true,
        }),
    }
}

/// Database queries (PostgreSQL, MySQL)
///
/// - Timeout: 10s (queries should be fast)
/// - Circuit breaker: 10 failures, 30s cooldown
/// - No retry (avoid duplicate writes)
pub fn database_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(10),
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_trials: 3,
        },
        retry: None, // Don't retry DB writes
    }
}

/// Redis/Cache operations
///
/// - Timeout: 5s (cache should be fast)
/// - Circuit breaker: 3 failures, 15s cooldown
/// - Retry: 2 attempts (idempotent reads)
pub fn redis_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(5),
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(15),
            half_open_max_trials: 2,
        },
        retry: Some(RetryConfig {
            max_attempts: 2,
            backoff: jittered(Duration::from_millis(50), Duration::from_secs(1)),
            jitter_fraction: 0.0,
            retry_on_timeout: true,
        }),
    }
}

/// External HTTP APIs (third-party services)
///
/// - Timeout: 60s (external services can be slow)
/// - Circuit breaker: 5 failures, 120s cooldown
/// - Retry: 5 attempts with longer backoff, timeouts not retried
pub fn http_external_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(60),
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(120),
            half_open_max_trials: 2,
        },
        retry: Some(RetryConfig {
            max_attempts: 5,
            backoff: jittered(Duration::from_millis(500), Duration::from_secs(30)),
            jitter_fraction: 0.0,
            retry_on_timeout: false,
        }),
    }
}

/// Kafka producer operations
///
/// - Timeout: 5s (produce should be fast)
/// - Circuit breaker: 5 failures, 30s cooldown
/// - Retry: 3 attempts (idempotent with keys)
pub fn kafka_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(5),
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_trials: 2,
        },
        retry: Some(RetryConfig {
            max_attempts: 3,
            backoff: jittered(Duration::from_millis(100), Duration::from_secs(5)),
            jitter_fraction: 0.0,
            retry_on_timeout: true,
        }),
    }
}

/// S3/Object storage operations
///
/// - Timeout: 120s (large file uploads)
/// - Circuit breaker: 5 failures, 60s cooldown
/// - Retry: 5 attempts (idempotent with multipart)
pub fn object_storage_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(120),
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_trials: 2,
        },
        retry: Some(RetryConfig {
            max_attempts: 5,
            backoff: jittered(Duration::from_millis(500), Duration::from_secs(30)),
            jitter_fraction: 0.0,
            retry_on_timeout: true,
        }),
    }
}

/// Prometheus metrics for resilience events
///
/// [`PrometheusListener`] turns [`ResilienceEvent`]s into counters and
/// histograms. Without the `metrics` feature every recorder is a no-op, so the
/// listener can be attached unconditionally.
use crate::events::{EventListener, ResilienceEvent};

#[cfg(feature = "metrics")]
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;

#[cfg(feature = "metrics")]
static CIRCUIT_BREAKER_STATE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "resilience_circuit_breaker_state_transitions_total",
        "Total number of circuit breaker state transitions",
        &["resource", "from", "to"]
    )
    .expect("Failed to register circuit breaker state transitions metric")
});

#[cfg(feature = "metrics")]
static CIRCUIT_BREAKER_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "resilience_circuit_breaker_calls_total",
        "Total number of circuit breaker admission decisions",
        &["resource", "result"]
    )
    .expect("Failed to register circuit breaker calls metric")
});

#[cfg(feature = "metrics")]
static ATTEMPT_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "resilience_attempts_total",
        "Total number of attempts by outcome",
        &["resource", "outcome"]
    )
    .expect("Failed to register attempt outcomes metric")
});

#[cfg(feature = "metrics")]
static RETRY_BACKOFF: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "resilience_retry_backoff_seconds",
        "Backoff waited before each retry",
        &["resource"]
    )
    .expect("Failed to register retry backoff metric")
});

#[cfg(feature = "metrics")]
static FALLBACK_INVOCATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "resilience_fallback_invocations_total",
        "Total number of fallback invocations",
        &["resource", "reason"]
    )
    .expect("Failed to register fallback invocations metric")
});

/// Metrics collector for circuit breaker
#[cfg(feature = "metrics")]
pub struct CircuitBreakerMetrics;

#[cfg(feature = "metrics")]
impl CircuitBreakerMetrics {
    pub fn record_state_transition(resource: &str, from: &str, to: &str) {
        CIRCUIT_BREAKER_STATE_TRANSITIONS
            .with_label_values(&[resource, from, to])
            .inc();
    }

    pub fn record_call(resource: &str, result: &str) {
        CIRCUIT_BREAKER_CALLS
            .with_label_values(&[resource, result])
            .inc();
    }
}

/// Metrics collector for retries and fallbacks
#[cfg(feature = "metrics")]
pub struct RetryMetrics;

#[cfg(feature = "metrics")]
impl RetryMetrics {
    pub fn record_attempt(resource: &str, outcome: &str) {
        ATTEMPT_OUTCOMES.with_label_values(&[resource, outcome]).inc();
    }

    pub fn record_backoff(resource: &str, delay_secs: f64) {
        RETRY_BACKOFF.with_label_values(&[resource]).observe(delay_secs);
    }

    pub fn record_fallback(resource: &str, reason: &str) {
        FALLBACK_INVOCATIONS
            .with_label_values(&[resource, reason])
            .inc();
    }
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub struct CircuitBreakerMetrics;

#[cfg(not(feature = "metrics"))]
impl CircuitBreakerMetrics {
    pub fn record_state_transition(_resource: &str, _from: &str, _to: &str) {}
    pub fn record_call(_resource: &str, _result: &str) {}
}

#[cfg(not(feature = "metrics"))]
pub struct RetryMetrics;

#[cfg(not(feature = "metrics"))]
impl RetryMetrics {
    pub fn record_attempt(_resource: &str, _outcome: &str) {}
    pub fn record_backoff(_resource: &str, _delay_secs: f64) {}
    pub fn record_fallback(_resource: &str, _reason: &str) {}
}

/// Event listener feeding the collectors above
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusListener;

impl EventListener for PrometheusListener {
    fn on_event(&self, event: &ResilienceEvent) {
        match event {
            ResilienceEvent::CallAdmitted { resource, .. } => {
                CircuitBreakerMetrics::record_call(resource, "admitted")
            }
            ResilienceEvent::CallRejected { resource, .. } => {
                CircuitBreakerMetrics::record_call(resource, "rejected")
            }
            ResilienceEvent::StateTransition { resource, from, to } => {
                CircuitBreakerMetrics::record_state_transition(resource, from.as_str(), to.as_str())
            }
            ResilienceEvent::AttemptSucceeded { resource, .. } => {
                RetryMetrics::record_attempt(resource, "success")
            }
            ResilienceEvent::AttemptFailed { resource, kind, .. } => {
                RetryMetrics::record_attempt(resource, kind.as_str())
            }
            ResilienceEvent::RetryScheduled {
                resource, delay, ..
            } => RetryMetrics::record_backoff(resource, delay.as_secs_f64()),
            ResilienceEvent::FallbackInvoked { resource, reason } => {
                RetryMetrics::record_fallback(resource, reason.as_str())
            }
        }
    }
}

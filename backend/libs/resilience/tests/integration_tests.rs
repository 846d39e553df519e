/// Integration tests for resilience library
use parking_lot::Mutex;
use resilience::{
    circuit_breaker::{
        new_circuit_breaker, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError,
        CircuitState,
    },
    presets, resilient,
    retry::{new_retry_policy, RetryError},
    timeout::with_timeout,
    Backoff, CancellationToken, FailureKind, Fallback, ResilienceError, ResilienceEvent,
    ResilienceRegistry, ResilientCall, RetryConfig, RetryPolicy, TimeoutError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<ResilienceEvent>>,
}

impl Recorder {
    fn count(&self, pred: impl Fn(&ResilienceEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl resilience::EventListener for Recorder {
    fn on_event(&self, event: &ResilienceEvent) {
        self.events.lock().push(event.clone());
    }
}

// ==================== Circuit Breaker Tests ====================

#[tokio::test(start_paused = true)]
async fn test_breaker_scenario_threshold_five_recovery_sixty() {
    init_tracing();
    let cb = new_circuit_breaker(5, Duration::from_secs(60), 1);

    for _ in 0..5 {
        let _ = cb.call(|| async { Err::<(), _>("error") }).await;
    }
    assert_eq!(cb.state(), CircuitState::Open);

    let rejected = cb.call(|| async { Ok::<_, String>(()) }).await;
    assert!(matches!(rejected, Err(CircuitBreakerError::Open(_))));

    tokio::time::advance(Duration::from_secs(60)).await;
    assert_ok!(cb.call(|| async { Ok::<_, String>(()) }).await);
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_breaker_full_lifecycle() {
    let config = CircuitBreakerConfig {
        failure_threshold: 3,
        recovery_timeout: Duration::from_millis(100),
        half_open_max_trials: 2,
    };
    let cb = CircuitBreaker::new(config);

    // Phase 1: Closed -> Open (3 failures)
    for _ in 0..3 {
        let _ = cb.call(|| async { Err::<(), _>("error") }).await;
    }
    assert_eq!(cb.state(), CircuitState::Open);

    // Phase 2: Open -> HalfOpen (wait for timeout)
    tokio::time::advance(Duration::from_millis(150)).await;
    let _ = cb.call(|| async { Ok::<_, String>(()) }).await;
    assert_eq!(cb.state(), CircuitState::HalfOpen);

    // Phase 3: HalfOpen -> Closed (second trial succeeds)
    let _ = cb.call(|| async { Ok::<_, String>(()) }).await;
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_rejects_until_recovery_timeout() {
    let cb = new_circuit_breaker(2, Duration::from_secs(10), 1);
    for _ in 0..2 {
        let _ = cb.call(|| async { Err::<(), _>("error") }).await;
    }

    for _ in 0..9 {
        assert_err!(cb.try_acquire());
        tokio::time::advance(Duration::from_secs(1)).await;
    }
    assert_err!(cb.try_acquire());

    tokio::time::advance(Duration::from_secs(1)).await;
    let permit = assert_ok!(cb.try_acquire());
    assert_eq!(cb.state(), CircuitState::HalfOpen);
    permit.record_failure();

    // Failed trial restarts the recovery timer
    assert_eq!(cb.state(), CircuitState::Open);
    assert_eq!(
        cb.try_acquire().unwrap_err().retry_after,
        Duration::from_secs(10)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_get_single_half_open_trial() {
    let cb = new_circuit_breaker(1, Duration::from_millis(20), 1);
    let _ = cb.call(|| async { Err::<(), _>("trip") }).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let admitted = Arc::new(AtomicU32::new(0));
    let barrier = Arc::new(tokio::sync::Barrier::new(16));
    let release = CancellationToken::new();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cb = cb.clone();
        let admitted = admitted.clone();
        let barrier = barrier.clone();
        let release = release.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            cb.call(|| async move {
                admitted.fetch_add(1, Ordering::SeqCst);
                // Hold the trial slot until every caller has raced
                release.cancelled().await;
                Ok::<_, String>(())
            })
            .await
        }));
    }

    // Let every racer reach the admission check
    tokio::time::sleep(Duration::from_millis(50)).await;
    release.cancel();

    let mut rejected = 0;
    for handle in handles {
        if handle.await.unwrap().is_err() {
            rejected += 1;
        }
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 1);
    assert_eq!(rejected, 15);
    assert_eq!(cb.state(), CircuitState::Closed);
}

// ==================== Timeout Tests ====================

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_near_deadline() {
    let start = Instant::now();
    let result = with_timeout(Duration::from_millis(100), async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        42
    })
    .await;

    assert_eq!(
        result,
        Err(TimeoutError {
            duration: Duration::from_millis(100)
        })
    );
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(100) && elapsed < Duration::from_millis(500));
}

#[tokio::test]
async fn test_timeout_real_clock_tolerance() {
    let start = std::time::Instant::now();
    let result = with_timeout(Duration::from_millis(100), async {
        tokio::time::sleep(Duration::from_millis(500)).await;
    })
    .await;

    assert!(result.is_err());
    assert!(start.elapsed() < Duration::from_millis(400));
}

// ==================== Retry Tests ====================

#[tokio::test(start_paused = true)]
async fn test_retry_two_failures_then_success() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();
    let policy = new_retry_policy(
        3,
        Backoff::fixed(Duration::from_millis(10)),
        |_: &&str| FailureKind::Retryable,
        0.0,
    );
    let recorder = Arc::new(Recorder::default());

    let result = ResilientCall::<u32, &str>::new()
        .retry(policy)
        .listener(recorder.clone())
        .call(move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err("transient error")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(
        recorder.count(|e| matches!(e, ResilienceEvent::RetryScheduled { .. })),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_always_failing_exhausts_attempts() {
    let counter = AtomicU32::new(0);
    let policy = RetryPolicy::retry_all(RetryConfig {
        max_attempts: 4,
        backoff: Backoff::exponential(Duration::from_millis(10)),
        ..Default::default()
    });

    let result = policy
        .execute(|| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("persistent error") }
        })
        .await;

    assert!(matches!(
        result,
        Err(RetryError::MaxRetriesExceeded {
            attempts: 4,
            last_error: "persistent error"
        })
    ));
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_first_attempt_aborts() {
    let counter = AtomicU32::new(0);
    let policy = new_retry_policy(
        5,
        Backoff::fixed(Duration::from_secs(1)),
        |_: &&str| FailureKind::Terminal,
        0.0,
    );
    let start = Instant::now();

    let result = policy
        .execute(|| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("invalid request") }
        })
        .await;

    assert!(matches!(result, Err(RetryError::NonRetryable { attempt: 1, .. })));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[test]
fn test_jittered_backoff_band() {
    let base = Duration::from_millis(200);
    let backoff = Backoff::exponential_with_jitter(base, 0.2).with_multiplier(3.0);
    for attempt in 1..=4 {
        let nominal = base.as_secs_f64() * 3f64.powi(attempt as i32 - 1);
        for _ in 0..100 {
            let value = backoff.compute(attempt).as_secs_f64();
            assert!(value >= nominal * 0.8 - 1e-9 && value <= nominal * 1.2 + 1e-9);
        }
    }
}

// ==================== Combined Scenario Tests ====================

#[tokio::test(start_paused = true)]
async fn test_resilient_fallback_after_three_attempts() {
    let attempts = AtomicU32::new(0);
    let policy = RetryPolicy::retry_all(RetryConfig {
        max_attempts: 3,
        backoff: Backoff::exponential(Duration::from_secs(1)),
        ..Default::default()
    });
    let fallback = Fallback::value("default_value".to_string());

    let result = resilient(
        || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<String, _>("unavailable") }
        },
        None,
        Some(&policy),
        None,
        Some(&fallback),
    )
    .await;

    assert_eq!(result.unwrap(), "default_value");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_every_attempt_is_reported_to_breaker() {
    let breaker = new_circuit_breaker(3, Duration::from_secs(30), 1);
    let policy = new_retry_policy(
        3,
        Backoff::fixed(Duration::from_millis(5)),
        |_: &&str| FailureKind::Retryable,
        0.0,
    );

    let result = resilient(
        || async { Err::<(), _>("boom") },
        Some(&breaker),
        Some(&policy),
        Some(Duration::from_secs(1)),
        None,
    )
    .await;

    // One retried call is enough to trip a threshold of 3
    assert!(matches!(
        result,
        Err(ResilienceError::MaxRetriesExceeded { attempts: 3, .. })
    ));
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_events_cover_admission_attempts_and_fallback() {
    init_tracing();
    let recorder = Arc::new(Recorder::default());
    let invocations = AtomicU32::new(0);
    let breaker = CircuitBreaker::named(
        "search",
        CircuitBreakerConfig::new(2, Duration::from_secs(60), 1),
    )
    .with_listener(recorder.clone());

    let call = ResilientCall::<u32, &str>::new()
        .breaker(breaker)
        .retry(new_retry_policy(
            3,
            Backoff::fixed(Duration::from_millis(1)),
            |_: &&str| FailureKind::Retryable,
            0.0,
        ))
        .fallback(Fallback::value(0))
        .listener(recorder.clone());

    let result = call
        .call(|| {
            invocations.fetch_add(1, Ordering::SeqCst);
            async { Err("index offline") }
        })
        .await;
    assert_eq!(result.unwrap(), 0);

    // The rejected third attempt never ran and is not reported as one
    let failed = recorder.count(|e| matches!(e, ResilienceEvent::AttemptFailed { .. }));
    assert_eq!(failed, invocations.load(Ordering::SeqCst) as usize);
    assert_eq!(failed, 2);

    assert_eq!(recorder.count(|e| matches!(e, ResilienceEvent::CallAdmitted { .. })), 2);
    assert_eq!(recorder.count(|e| matches!(e, ResilienceEvent::CallRejected { .. })), 1);
    assert_eq!(recorder.count(|e| matches!(e, ResilienceEvent::StateTransition { .. })), 1);
    assert_eq!(recorder.count(|e| matches!(e, ResilienceEvent::FallbackInvoked { .. })), 1);
    assert!(recorder.events.lock().iter().all(|e| e.resource() == "search"));
}

#[tokio::test(start_paused = true)]
async fn test_external_cancellation_stops_backoff() {
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let result = ResilientCall::<(), &str>::new()
        .retry(new_retry_policy(
            10,
            Backoff::fixed(Duration::from_secs(30)),
            |_: &&str| FailureKind::Retryable,
            0.0,
        ))
        .cancellation(token)
        .call(|| async { Err("down") })
        .await;

    assert!(matches!(result, Err(ResilienceError::Cancelled)));
    assert_eq!(start.elapsed(), Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn test_registry_from_presets() {
    init_tracing();
    let registry = ResilienceRegistry::new();
    registry.register("kafka", presets::kafka_config());

    let call = registry.call::<&str, &str>("kafka").unwrap();
    let result = call.call(|| async { Ok("produced") }).await;
    assert_eq!(result.unwrap(), "produced");

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].name, "kafka");
    assert_eq!(snapshot[0].state, CircuitState::Closed);
}

// ==================== Preset Configuration Tests ====================

#[test]
fn test_grpc_config_values() {
    let config = presets::grpc_config();
    assert_eq!(config.timeout.duration, Duration::from_secs(30));
    assert_eq!(config.circuit_breaker.failure_threshold, 5);
    assert_eq!(config.retry.unwrap().max_attempts, 3);
}

#[test]
fn test_database_config_no_retry() {
    let config = presets::database_config();
    assert_eq!(config.timeout.duration, Duration::from_secs(10));
    assert!(config.retry.is_none()); // DB should not retry
}

#[test]
fn test_object_storage_config_long_timeout() {
    let config = presets::object_storage_config();
    assert_eq!(config.timeout.duration, Duration::from_secs(120));
    assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(60));
}

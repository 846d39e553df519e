/// Tower Layer integration for composable resilience patterns
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::Service;
use tower_layer::Layer;

/// Circuit Breaker Layer for Tower services
#[derive(Clone, Debug)]
pub struct CircuitBreakerLayer {
    circuit_breaker: CircuitBreaker,
}

impl CircuitBreakerLayer {
    pub fn new(circuit_breaker: CircuitBreaker) -> Self {
        Self { circuit_breaker }
    }
}

impl<S> Layer<S> for CircuitBreakerLayer {
    type Service = CircuitBreakerService<S>;

    fn layer(&self, service: S) -> Self::Service {
        CircuitBreakerService {
            inner: service,
            circuit_breaker: self.circuit_breaker.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerService<S> {
    inner: S,
    circuit_breaker: CircuitBreaker,
}

impl<S> CircuitBreakerService<S> {
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }
}

impl<S, Request> Service<Request> for CircuitBreakerService<S>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Future: Send,
    S::Response: Send,
    S::Error: Send,
    Request: Send + 'static,
{
    type Response = S::Response;
    type Error = CircuitBreakerError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(CircuitBreakerError::CallFailed)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        // Admission is decided when the request is issued, not when polled
        let permit = self.circuit_breaker.try_acquire();
        // Take the service that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let permit = match permit {
                Ok(permit) => permit,
                Err(open) => return Err(CircuitBreakerError::Open(open)),
            };
            match inner.call(req).await {
                Ok(response) => {
                    permit.record_success();
                    Ok(response)
                }
                Err(e) => {
                    permit.record_failure();
                    Err(CircuitBreakerError::CallFailed(e))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    #[derive(Clone)]
    struct MockService {
        counter: Arc<AtomicU32>,
        fail_until: u32,
    }

    impl Service<()> for MockService {
        type Response = String;
        type Error = String;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: ()) -> Self::Future {
            let count = self.counter.fetch_add(1, Ordering::SeqCst);
            let fail_until = self.fail_until;

            Box::pin(async move {
                if count < fail_until {
                    Err("Service error".to_string())
                } else {
                    Ok("Success".to_string())
                }
            })
        }
    }

    #[tokio::test]
    async fn test_circuit_breaker_layer() {
        let counter = Arc::new(AtomicU32::new(0));
        let mock_service = MockService {
            counter: counter.clone(),
            fail_until: 3,
        };

        let circuit_breaker = CircuitBreaker::named(
            "mock",
            CircuitBreakerConfig {
                failure_threshold: 2,
                ..Default::default()
            },
        );
        let layer = CircuitBreakerLayer::new(circuit_breaker);

        let mut service = layer.layer(mock_service);

        // First 2 calls fail
        let _ = service.ready().await.unwrap().call(()).await;
        let _ = service.ready().await.unwrap().call(()).await;

        // Circuit should be open now and the inner service untouched
        let result = service.ready().await.unwrap().call(()).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(service.circuit_breaker().state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_layer_recovers_through_half_open() {
        let counter = Arc::new(AtomicU32::new(0));
        let circuit_breaker = CircuitBreaker::named(
            "mock",
            CircuitBreakerConfig::new(1, Duration::from_secs(5), 1),
        );
        let mut service = CircuitBreakerLayer::new(circuit_breaker).layer(MockService {
            counter: counter.clone(),
            fail_until: 1,
        });

        let first = service.ready().await.unwrap().call(()).await;
        assert!(matches!(first, Err(CircuitBreakerError::CallFailed(_))));

        tokio::time::advance(Duration::from_secs(5)).await;
        let recovered = service.ready().await.unwrap().call(()).await;
        assert_eq!(recovered.unwrap(), "Success");
        assert_eq!(service.circuit_breaker().state(), CircuitState::Closed);
    }
}

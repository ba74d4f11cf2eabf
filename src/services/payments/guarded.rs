use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{AuthorizationStatus, GatewayError, PaymentAuthorization, PaymentGateway};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};

/// Puts a per-call timeout and a circuit breaker in front of another gateway.
#[derive(Clone)]
pub struct GuardedGateway {
    inner: Arc<dyn PaymentGateway>,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl GuardedGateway {
    pub fn new(inner: Arc<dyn PaymentGateway>, breaker: CircuitBreaker, timeout: Duration) -> Self {
        Self {
            inner,
            breaker,
            timeout,
        }
    }

    async fn guarded<F, Fut, R>(&self, operation: &'static str, f: F) -> Result<R, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<R, GatewayError>>,
    {
        let timeout = self.timeout;
        let result = self
            .breaker
            .call(|| async move {
                match tokio::time::timeout(timeout, f()).await {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::Timeout),
                }
            })
            .await;

        result.map_err(|err| match err {
            CircuitBreakerError::CircuitOpen => {
                warn!(operation, "payment gateway circuit open, call rejected");
                GatewayError::CircuitOpen
            }
            CircuitBreakerError::ServiceFailure(inner) => inner,
        })
    }
}

#[async_trait]
impl PaymentGateway for GuardedGateway {
    async fn create_authorization(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: HashMap<String, String>,
    ) -> Result<PaymentAuthorization, GatewayError> {
        let inner = self.inner.clone();
        self.guarded("create_authorization", || async move {
            inner
                .create_authorization(amount_minor, currency, metadata)
                .await
        })
        .await
    }

    async fn retrieve_status(
        &self,
        authorization_id: &str,
    ) -> Result<AuthorizationStatus, GatewayError> {
        let inner = self.inner.clone();
        self.guarded("retrieve_status", || async move {
            inner.retrieve_status(authorization_id).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::payments::{InMemoryGateway, MockPaymentGateway};

    #[tokio::test]
    async fn slow_gateway_times_out() {
        let inner = InMemoryGateway::new();
        inner.set_latency(Duration::from_millis(200));
        let gateway = GuardedGateway::new(
            Arc::new(inner),
            CircuitBreaker::new(5, Duration::from_secs(30), 1),
            Duration::from_millis(20),
        );

        let result = gateway
            .create_authorization(100, "inr", HashMap::new())
            .await;
        assert_eq!(result, Err(GatewayError::Timeout));
    }

    #[tokio::test]
    async fn repeated_failures_open_the_circuit() {
        let mut mock = MockPaymentGateway::new();
        mock.expect_create_authorization()
            .times(2)
            .returning(|_, _, _| Err(GatewayError::Transport("down".into())));
        let gateway = GuardedGateway::new(
            Arc::new(mock),
            CircuitBreaker::new(2, Duration::from_secs(60), 1),
            Duration::from_secs(1),
        );

        for _ in 0..2 {
            let result = gateway
                .create_authorization(100, "inr", HashMap::new())
                .await;
            assert!(matches!(result, Err(GatewayError::Transport(_))));
        }

        let result = gateway
            .create_authorization(100, "inr", HashMap::new())
            .await;
        assert_eq!(result, Err(GatewayError::CircuitOpen));
    }
}

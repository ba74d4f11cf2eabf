use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{AuthorizationStatus, GatewayError, PaymentAuthorization, PaymentGateway};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRecord {
    pub authorization: PaymentAuthorization,
    pub amount_minor: i64,
    pub currency: String,
    pub metadata: HashMap<String, String>,
}

/// Gateway kept in process memory, used by the `mock` provider and in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGateway {
    records: Arc<DashMap<String, AuthorizationRecord>>,
    unavailable: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the authorization as paid.
    pub fn settle(&self, authorization_id: &str) -> bool {
        self.set_status(authorization_id, AuthorizationStatus::Succeeded)
    }

    pub fn set_status(&self, authorization_id: &str, status: AuthorizationStatus) -> bool {
        match self.records.get_mut(authorization_id) {
            Some(mut record) => {
                record.authorization.status = status;
                true
            }
            None => false,
        }
    }

    /// While set, every call fails with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn get(&self, authorization_id: &str) -> Option<AuthorizationRecord> {
        self.records
            .get(authorization_id)
            .map(|record| record.value().clone())
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    async fn simulate(&self) -> Result<(), GatewayError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport(
                "mock gateway unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn create_authorization(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: HashMap<String, String>,
    ) -> Result<PaymentAuthorization, GatewayError> {
        self.simulate().await?;
        if amount_minor <= 0 {
            return Err(GatewayError::Rejected(
                "amount must be positive".to_string(),
            ));
        }

        let id = format!("mock_pi_{}", Uuid::new_v4().simple());
        let authorization = PaymentAuthorization {
            client_secret: format!("{}_secret_{}", id, Uuid::new_v4().simple()),
            id: id.clone(),
            status: AuthorizationStatus::RequiresPaymentMethod,
        };
        self.records.insert(
            id,
            AuthorizationRecord {
                authorization: authorization.clone(),
                amount_minor,
                currency: currency.to_string(),
                metadata,
            },
        );
        Ok(authorization)
    }

    async fn retrieve_status(
        &self,
        authorization_id: &str,
    ) -> Result<AuthorizationStatus, GatewayError> {
        self.simulate().await?;
        self.records
            .get(authorization_id)
            .map(|record| record.authorization.status)
            .ok_or_else(|| GatewayError::NotFound(authorization_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn authorizations_start_unpaid_and_can_be_settled() {
        let gateway = InMemoryGateway::new();
        let auth = gateway
            .create_authorization(13_000, "inr", HashMap::new())
            .await
            .unwrap();

        assert!(auth.id.starts_with("mock_pi_"));
        assert!(auth.client_secret.starts_with(&format!("{}_secret_", auth.id)));
        assert_eq!(
            gateway.retrieve_status(&auth.id).await.unwrap(),
            AuthorizationStatus::RequiresPaymentMethod
        );

        assert!(gateway.settle(&auth.id));
        assert!(gateway.retrieve_status(&auth.id).await.unwrap().is_settled());
    }

    #[tokio::test]
    async fn unavailable_gateway_fails_calls() {
        let gateway = InMemoryGateway::new();
        gateway.set_unavailable(true);
        let result = gateway
            .create_authorization(100, "inr", HashMap::new())
            .await;
        assert!(matches!(result, Err(GatewayError::Transport(_))));
        assert_eq!(gateway.count(), 0);
    }
}

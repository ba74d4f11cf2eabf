//! Payment gateway boundary.
//!
//! The gateway owns the authorization; orders keep only its id and a cached
//! payment status that is always re-checked through [`PaymentGateway::retrieve_status`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use utoipa::ToSchema;

pub mod guarded;
pub mod in_memory;
pub mod stripe;

pub use guarded::GuardedGateway;
pub use in_memory::InMemoryGateway;
pub use stripe::StripeGateway;

/// Gateway-side state of an authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(other)]
    Other,
}

impl AuthorizationStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, AuthorizationStatus::Succeeded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequiresPaymentMethod => "requires_payment_method",
            Self::RequiresConfirmation => "requires_confirmation",
            Self::RequiresAction => "requires_action",
            Self::Processing => "processing",
            Self::RequiresCapture => "requires_capture",
            Self::Canceled => "canceled",
            Self::Succeeded => "succeeded",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAuthorization {
    pub id: String,
    /// Token the client uses to continue the payment.
    pub client_secret: String,
    pub status: AuthorizationStatus,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Payment gateway timed out")]
    Timeout,
    #[error("Payment gateway rejected the request: {0}")]
    Rejected(String),
    #[error("Payment gateway transport error: {0}")]
    Transport(String),
    #[error("Payment gateway circuit is open")]
    CircuitOpen,
    #[error("Authorization {0} not found")]
    NotFound(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates an authorization for `amount_minor` in the smallest unit of `currency`.
    async fn create_authorization(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: HashMap<String, String>,
    ) -> Result<PaymentAuthorization, GatewayError>;

    async fn retrieve_status(&self, authorization_id: &str)
        -> Result<AuthorizationStatus, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_statuses_deserialize_as_other() {
        let status: AuthorizationStatus = serde_json::from_str("\"partially_funded\"").unwrap();
        assert_eq!(status, AuthorizationStatus::Other);
        let status: AuthorizationStatus = serde_json::from_str("\"succeeded\"").unwrap();
        assert!(status.is_settled());
    }

    #[test]
    fn only_succeeded_counts_as_settled() {
        assert!(!AuthorizationStatus::RequiresCapture.is_settled());
        assert!(!AuthorizationStatus::Processing.is_settled());
        assert_eq!(AuthorizationStatus::RequiresAction.as_str(), "requires_action");
    }
}

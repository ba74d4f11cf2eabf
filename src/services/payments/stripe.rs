use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{AuthorizationStatus, GatewayError, PaymentAuthorization, PaymentGateway};

/// Stripe PaymentIntents over the REST API.
#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    status: AuthorizationStatus,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

impl StripeGateway {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn transport(err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(err.to_string())
        }
    }

    async fn read_intent(response: reqwest::Response) -> Result<PaymentIntent, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<PaymentIntent>().await.map_err(Self::transport);
        }

        let message = response
            .json::<StripeErrorBody>()
            .await
            .ok()
            .and_then(|body| body.error.message)
            .unwrap_or_else(|| status.to_string());
        warn!(status = status.as_u16(), %message, "stripe request failed");

        if status == reqwest::StatusCode::NOT_FOUND {
            Err(GatewayError::NotFound(message))
        } else if status.is_client_error() {
            Err(GatewayError::Rejected(message))
        } else {
            Err(GatewayError::Transport(message))
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, metadata))]
    async fn create_authorization(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: HashMap<String, String>,
    ) -> Result<PaymentAuthorization, GatewayError> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".to_string(), amount_minor.to_string()),
            ("currency".to_string(), currency.to_lowercase()),
        ];
        let mut keys: Vec<_> = metadata.into_iter().collect();
        keys.sort();
        form.extend(
            keys.into_iter()
                .map(|(key, value)| (format!("metadata[{}]", key), value)),
        );

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.api_key)
            .form(&form)
            .send()
            .await
            .map_err(Self::transport)?;

        let intent = Self::read_intent(response).await?;
        debug!(intent_id = %intent.id, "payment intent created");

        let client_secret = intent.client_secret.ok_or_else(|| {
            GatewayError::Transport("payment intent has no client_secret".to_string())
        })?;

        Ok(PaymentAuthorization {
            id: intent.id,
            client_secret,
            status: intent.status,
        })
    }

    #[instrument(skip(self))]
    async fn retrieve_status(
        &self,
        authorization_id: &str,
    ) -> Result<AuthorizationStatus, GatewayError> {
        let response = self
            .client
            .get(format!(
                "{}/v1/payment_intents/{}",
                self.base_url, authorization_id
            ))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::transport)?;

        Ok(Self::read_intent(response).await?.status)
    }
}

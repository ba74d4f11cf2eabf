use std::collections::HashMap;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use storefront_api::services::payments::{
    AuthorizationStatus, GatewayError, PaymentGateway, StripeGateway,
};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway(server: &MockServer, timeout: Duration) -> StripeGateway {
    StripeGateway::new("sk_test_123", server.uri(), timeout).expect("build gateway")
}

#[tokio::test]
async fn creates_payment_intent_with_amount_and_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(body_string_contains("amount=6775"))
        .and(body_string_contains("currency=usd"))
        .and(body_string_contains("metadata%5Buser_id%5D=alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_123",
            "object": "payment_intent",
            "client_secret": "pi_123_secret_abc",
            "status": "requires_payment_method"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let metadata = HashMap::from([("user_id".to_string(), "alice".to_string())]);
    let authorization = gateway(&server, Duration::from_secs(5))
        .create_authorization(6775, "USD", metadata)
        .await
        .expect("authorization");

    assert_eq!(authorization.id, "pi_123");
    assert_eq!(authorization.client_secret, "pi_123_secret_abc");
    assert_eq!(authorization.status, AuthorizationStatus::RequiresPaymentMethod);
}

#[tokio::test]
async fn retrieves_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_paid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_paid",
            "status": "succeeded"
        })))
        .mount(&server)
        .await;

    let status = gateway(&server, Duration::from_secs(5))
        .retrieve_status("pi_paid")
        .await
        .expect("status");

    assert!(status.is_settled());
}

#[tokio::test]
async fn unfamiliar_status_is_not_settled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_odd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_odd",
            "status": "partially_funded"
        })))
        .mount(&server)
        .await;

    let status = gateway(&server, Duration::from_secs(5))
        .retrieve_status("pi_odd")
        .await
        .expect("status");

    assert_eq!(status, AuthorizationStatus::Other);
    assert!(!status.is_settled());
}

#[tokio::test]
async fn card_errors_are_rejections() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": { "type": "card_error", "message": "Your card was declined." }
        })))
        .mount(&server)
        .await;

    let err = gateway(&server, Duration::from_secs(5))
        .create_authorization(1000, "usd", HashMap::new())
        .await
        .unwrap_err();

    assert_matches!(err, GatewayError::Rejected(message) if message == "Your card was declined.");
}

#[tokio::test]
async fn unknown_intent_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "type": "invalid_request_error", "message": "No such payment_intent" }
        })))
        .mount(&server)
        .await;

    let err = gateway(&server, Duration::from_secs(5))
        .retrieve_status("pi_missing")
        .await
        .unwrap_err();

    assert_matches!(err, GatewayError::NotFound(_));
}

#[tokio::test]
async fn server_errors_are_transport_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = gateway(&server, Duration::from_secs(5))
        .create_authorization(1000, "usd", HashMap::new())
        .await
        .unwrap_err();

    assert_matches!(err, GatewayError::Transport(_));
}

#[tokio::test]
async fn slow_gateway_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_json(json!({
                    "id": "pi_slow",
                    "client_secret": "pi_slow_secret",
                    "status": "requires_payment_method"
                })),
        )
        .mount(&server)
        .await;

    let err = gateway(&server, Duration::from_millis(50))
        .create_authorization(1000, "usd", HashMap::new())
        .await
        .unwrap_err();

    assert_matches!(err, GatewayError::Timeout);
}

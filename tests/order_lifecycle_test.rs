mod common;

use std::time::Duration;

use common::{checkout_request, customer, TestApp};
use rust_decimal_macros::dec;
use storefront_api::entities::order::{OrderStatus, PaymentStatus};
use storefront_api::errors::ServiceError;
use storefront_api::services::activity::ActivityFilter;
use storefront_api::services::checkout::CheckoutReceipt;
use storefront_api::services::payments::AuthorizationStatus;
use uuid::Uuid;

async fn place_order(app: &TestApp, user_id: &str) -> (CheckoutReceipt, String) {
    let variant = app
        .seed_variant(&format!("SKU-{}", user_id.to_uppercase()), dec!(25.00), 5)
        .await;
    app.add_to_cart(user_id, variant.id, 1).await;
    let receipt = app
        .state
        .services
        .checkout
        .checkout(&customer(user_id), checkout_request(None))
        .await
        .expect("checkout");
    let order = app
        .state
        .services
        .orders
        .get(receipt.order_id)
        .await
        .expect("order");
    let authorization_id = order.payment_intent_id.expect("authorization id");
    (receipt, authorization_id)
}

/// Activity entries are written on background tasks.
async fn wait_for_activity(app: &TestApp, action_type: &str, expected: u64) -> u64 {
    let mut seen = 0;
    for _ in 0..50 {
        seen = app
            .state
            .services
            .activity
            .list(
                ActivityFilter {
                    user_id: None,
                    action_type: Some(action_type.to_string()),
                },
                0,
                50,
            )
            .await
            .expect("list activity")
            .total;
        if seen >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    seen
}

#[tokio::test]
async fn confirm_waits_for_settled_payment() {
    let app = TestApp::new().await;
    let (receipt, _) = place_order(&app, "mia").await;

    let outcome = app
        .state
        .services
        .orders
        .confirm(receipt.order_id, "mia")
        .await
        .expect("confirm call");

    assert!(!outcome.confirmed);
    assert_eq!(outcome.status, OrderStatus::Pending);
    assert_eq!(outcome.gateway_status, AuthorizationStatus::RequiresPaymentMethod);
}

#[tokio::test]
async fn confirm_is_idempotent() {
    let app = TestApp::new().await;
    let (receipt, authorization_id) = place_order(&app, "noah").await;
    assert!(app.gateway.settle(&authorization_id));

    let orders = app.state.services.orders.clone();
    let (first, second) = tokio::join!(
        orders.confirm(receipt.order_id, "noah"),
        orders.confirm(receipt.order_id, "noah")
    );
    let third = orders
        .confirm(receipt.order_id, "noah")
        .await
        .expect("repeat confirm");

    for outcome in [first.expect("first"), second.expect("second"), third] {
        assert!(outcome.confirmed);
        assert_eq!(outcome.status, OrderStatus::Confirmed);
        assert_eq!(outcome.payment_status, PaymentStatus::Paid);
    }

    assert_eq!(wait_for_activity(&app, "confirm", 1).await, 1);
    // A straggler would show up here.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(wait_for_activity(&app, "confirm", 1).await, 1);
}

#[tokio::test]
async fn confirm_of_someone_elses_order_is_not_found() {
    let app = TestApp::new().await;
    let (receipt, authorization_id) = place_order(&app, "olga").await;
    app.gateway.settle(&authorization_id);

    let err = app
        .state
        .services
        .orders
        .confirm(receipt.order_id, "mallory")
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn confirm_surfaces_gateway_outage() {
    let app = TestApp::new().await;
    let (receipt, _) = place_order(&app, "pete").await;
    app.gateway.set_unavailable(true);

    let err = app
        .state
        .services
        .orders
        .confirm(receipt.order_id, "pete")
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::ExternalServiceError(_)));
}

#[tokio::test]
async fn terminal_orders_reject_further_changes() {
    let app = TestApp::new().await;
    let (receipt, _) = place_order(&app, "quinn").await;
    let orders = app.state.services.orders.clone();

    let shipped = orders
        .set_status(receipt.order_id, OrderStatus::Shipped, "admin-1")
        .await
        .expect("pending to shipped");
    assert_eq!(shipped.status, OrderStatus::Shipped);

    orders
        .set_status(receipt.order_id, OrderStatus::Delivered, "admin-1")
        .await
        .expect("shipped to delivered");

    let err = orders
        .set_status(receipt.order_id, OrderStatus::Processing, "admin-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatus(_)));

    // Re-applying the current status is a no-op, even when terminal.
    let same = orders
        .set_status(receipt.order_id, OrderStatus::Delivered, "admin-1")
        .await
        .expect("same status");
    assert_eq!(same.status, OrderStatus::Delivered);

    assert_eq!(wait_for_activity(&app, "update_status", 2).await, 2);
}

#[tokio::test]
async fn status_update_of_missing_order_is_not_found() {
    let app = TestApp::new().await;

    let err = app
        .state
        .services
        .orders
        .set_status(Uuid::new_v4(), OrderStatus::Cancelled, "admin-1")
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn admin_listing_filters_by_status() {
    let app = TestApp::new().await;
    let (first, _) = place_order(&app, "rita").await;
    place_order(&app, "sam").await;
    app.state
        .services
        .orders
        .set_status(first.order_id, OrderStatus::Cancelled, "admin-1")
        .await
        .expect("cancel");

    let cancelled = app
        .state
        .services
        .orders
        .list_all(Some(OrderStatus::Cancelled), 0, 50)
        .await
        .expect("list cancelled");
    assert_eq!(cancelled.total, 1);
    assert_eq!(cancelled.orders[0].id, first.order_id);

    let everything = app
        .state
        .services
        .orders
        .list_all(None, 0, 50)
        .await
        .expect("list all");
    assert_eq!(everything.total, 2);

    let mine = app
        .state
        .services
        .orders
        .list_for_user("sam", 0, 50)
        .await
        .expect("list mine");
    assert_eq!(mine.total, 1);
}

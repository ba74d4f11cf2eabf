mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration as ChronoDuration, Utc};
use common::{checkout_request, customer, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use storefront_api::entities::coupon::CouponType;
use storefront_api::entities::inventory_reservation::{self, ReservationStatus};
use storefront_api::entities::order::{OrderStatus, PaymentStatus};
use storefront_api::services::carts::CartService;
use storefront_api::services::checkout::{CheckoutError, CheckoutService, OrderNumberFn};
use storefront_api::services::inventory::InventoryLedger;
use uuid::Uuid;

fn checkout_with_numbers(app: &TestApp, numbers: OrderNumberFn) -> CheckoutService {
    let services = &app.state.services;
    CheckoutService::new(
        app.db(),
        (*services.carts).clone(),
        services.ledger.clone(),
        (*services.coupons).clone(),
        app.gateway.clone(),
        (*services.activity).clone(),
        app.state.event_sender.clone(),
        "usd",
    )
    .with_order_numbers(numbers)
}

fn scripted_numbers(script: &'static [&'static str]) -> OrderNumberFn {
    let next = Arc::new(AtomicUsize::new(0));
    Arc::new(move || {
        let i = next.fetch_add(1, Ordering::SeqCst).min(script.len() - 1);
        script[i].to_string()
    })
}

#[tokio::test]
async fn checkout_creates_pending_order_and_clears_cart() {
    let app = TestApp::new().await;
    let shirt = app.seed_variant("SHIRT-M", dec!(20.00), 5).await;
    let mug = app.seed_variant("MUG-1", dec!(12.50), 5).await;
    app.add_to_cart("alice", shirt.id, 2).await;
    app.add_to_cart("alice", mug.id, 1).await;

    let receipt = app
        .state
        .services
        .checkout
        .checkout(&customer("alice"), checkout_request(None))
        .await
        .expect("checkout succeeds");

    // 52.50 subtotal, 5.25 tax, 10.00 shipping below the free threshold.
    assert_eq!(receipt.total, dec!(67.75));
    assert!(receipt.order_number.starts_with("ORD-"));
    assert!(!receipt.client_secret.is_empty());

    let order = app
        .state
        .services
        .orders
        .get_for_user(receipt.order_id, "alice")
        .await
        .expect("order readable by owner");
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.items.len(), 2);
    assert_eq!(order.subtotal, dec!(52.50));

    let authorization_id = order.payment_intent_id.expect("authorization recorded");
    let record = app.gateway.get(&authorization_id).expect("gateway saw the call");
    assert_eq!(record.amount_minor, 6775);
    assert_eq!(record.metadata.get("user_id").map(String::as_str), Some("alice"));

    assert_eq!(app.stock_of(shirt.id).await, 3);
    assert_eq!(app.stock_of(mug.id).await, 4);

    let cart = app.state.services.carts.view("alice").await.expect("cart view");
    assert!(cart.items.is_empty());

    // Committed holds are no longer open.
    let open = app
        .state
        .services
        .ledger
        .stale_holds(Utc::now() + ChronoDuration::minutes(1))
        .await
        .expect("list holds");
    assert!(open.is_empty());
}

#[tokio::test]
async fn coupon_discount_and_free_shipping_apply() {
    let app = TestApp::new().await;
    let coat = app.seed_variant("COAT-L", dec!(120.00), 3).await;
    app.seed_coupon("save10", CouponType::Percentage, dec!(10), None)
        .await;
    app.add_to_cart("bob", coat.id, 1).await;

    let receipt = app
        .state
        .services
        .checkout
        .checkout(&customer("bob"), checkout_request(Some("SAVE10")))
        .await
        .expect("checkout succeeds");

    // 120.00 - 12.00 discount + 12.00 tax on the undiscounted subtotal, no shipping.
    assert_eq!(receipt.total, dec!(120.00));

    let order = app
        .state
        .services
        .orders
        .get(receipt.order_id)
        .await
        .expect("order exists");
    assert_eq!(order.discount, dec!(12.00));
    assert_eq!(order.shipping, dec!(0.00));
    assert_eq!(order.coupon_code.as_deref(), Some("SAVE10"));

    let coupons = app.state.services.coupons.list(1, 20).await.expect("list");
    assert_eq!(coupons.coupons[0].usage_count, 1);
}

#[tokio::test]
async fn invalid_coupon_is_ignored() {
    let app = TestApp::new().await;
    let hat = app.seed_variant("HAT-1", dec!(30.00), 3).await;
    app.add_to_cart("carol", hat.id, 1).await;

    let receipt = app
        .state
        .services
        .checkout
        .checkout(&customer("carol"), checkout_request(Some("NOPE")))
        .await
        .expect("checkout proceeds without the coupon");

    assert_eq!(receipt.total, dec!(43.00));
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let app = TestApp::new().await;

    let err = app
        .state
        .services
        .checkout
        .checkout(&customer("nobody"), checkout_request(None))
        .await
        .unwrap_err();

    assert_matches!(err, CheckoutError::EmptyCart);
    assert_eq!(app.gateway.count(), 0);
}

#[tokio::test]
async fn incomplete_address_is_rejected_before_any_hold() {
    let app = TestApp::new().await;
    let sock = app.seed_variant("SOCK-1", dec!(4.00), 2).await;
    app.add_to_cart("dave", sock.id, 2).await;

    let mut request = checkout_request(None);
    request.shipping_address.remove("postal_code");

    let err = app
        .state
        .services
        .checkout
        .checkout(&customer("dave"), request)
        .await
        .unwrap_err();

    assert_matches!(err, CheckoutError::InvalidAddress(_));
    assert_eq!(app.stock_of(sock.id).await, 2);
}

#[tokio::test]
async fn shortage_on_last_item_releases_earlier_holds() {
    let app = TestApp::new().await;
    let a = app.seed_variant("ITEM-A", dec!(10.00), 5).await;
    let b = app.seed_variant("ITEM-B", dec!(10.00), 5).await;
    let c = app.seed_variant("ITEM-C", dec!(10.00), 1).await;
    app.add_to_cart("erin", a.id, 2).await;
    app.add_to_cart("erin", b.id, 3).await;
    app.add_to_cart("erin", c.id, 1).await;

    // Someone else takes the last C after it went into the cart.
    let competitor = app
        .state
        .services
        .ledger
        .reserve(Uuid::new_v4(), c.id, 1)
        .await
        .expect("competing hold");

    let err = app
        .state
        .services
        .checkout
        .checkout(&customer("erin"), checkout_request(None))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        CheckoutError::InsufficientInventory { variant_id, requested: 1, available: 0 } if variant_id == c.id
    );
    assert_eq!(app.stock_of(a.id).await, 5);
    assert_eq!(app.stock_of(b.id).await, 5);
    assert_eq!(app.stock_of(c.id).await, 0);
    assert_eq!(app.gateway.count(), 0);

    let open = app
        .state
        .services
        .ledger
        .stale_holds(Utc::now() + ChronoDuration::minutes(1))
        .await
        .expect("list holds");
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, competitor.id);

    let cart = app.state.services.carts.view("erin").await.expect("cart");
    assert_eq!(cart.items.len(), 3);
}

#[tokio::test]
async fn gateway_outage_releases_holds_and_keeps_cart() {
    let app = TestApp::new().await;
    let lamp = app.seed_variant("LAMP-1", dec!(45.00), 2).await;
    app.add_to_cart("frank", lamp.id, 2).await;
    app.gateway.set_unavailable(true);

    let err = app
        .state
        .services
        .checkout
        .checkout(&customer("frank"), checkout_request(None))
        .await
        .unwrap_err();

    assert_matches!(err, CheckoutError::PaymentSetupFailed(_));
    assert_eq!(app.stock_of(lamp.id).await, 2);

    let cart = app.state.services.carts.view("frank").await.expect("cart");
    assert_eq!(cart.items.len(), 1);
    let orders = app
        .state
        .services
        .orders
        .list_for_user("frank", 0, 50)
        .await
        .expect("list orders");
    assert_eq!(orders.total, 0);
}

#[tokio::test]
async fn order_number_clash_is_retried_once() {
    let app = TestApp::new().await;
    let pen = app.seed_variant("PEN-1", dec!(2.00), 10).await;
    let checkout = checkout_with_numbers(&app, scripted_numbers(&["ORD-A", "ORD-A", "ORD-B"]));

    app.add_to_cart("gina", pen.id, 1).await;
    let first = checkout
        .checkout(&customer("gina"), checkout_request(None))
        .await
        .expect("first checkout");
    assert_eq!(first.order_number, "ORD-A");

    app.add_to_cart("hank", pen.id, 1).await;
    let second = checkout
        .checkout(&customer("hank"), checkout_request(None))
        .await
        .expect("second checkout retries with a fresh number");
    assert_eq!(second.order_number, "ORD-B");
}

#[tokio::test]
async fn persistence_failure_after_authorization_releases_stock() {
    let app = TestApp::new().await;
    let pen = app.seed_variant("PEN-2", dec!(2.00), 10).await;
    let checkout = checkout_with_numbers(&app, scripted_numbers(&["ORD-FIXED"]));

    app.add_to_cart("ivy", pen.id, 1).await;
    checkout
        .checkout(&customer("ivy"), checkout_request(None))
        .await
        .expect("first checkout takes the number");

    app.add_to_cart("jack", pen.id, 3).await;
    let err = checkout
        .checkout(&customer("jack"), checkout_request(None))
        .await
        .unwrap_err();

    assert_matches!(err, CheckoutError::Persistence(_));
    // The second authorization was created and is left for reconciliation.
    assert_eq!(app.gateway.count(), 2);
    assert_eq!(app.stock_of(pen.id).await, 9);

    let cart = app.state.services.carts.view("jack").await.expect("cart");
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
async fn holds_are_committed_to_the_order() {
    let app = TestApp::new().await;
    let cup = app.seed_variant("CUP-1", dec!(6.00), 10).await;
    let plate = app.seed_variant("PLATE-1", dec!(9.00), 10).await;
    app.add_to_cart("kate", cup.id, 4).await;
    app.add_to_cart("kate", plate.id, 2).await;

    let receipt = app
        .state
        .services
        .checkout
        .checkout(&customer("kate"), checkout_request(None))
        .await
        .expect("checkout succeeds");

    let holds = inventory_reservation::Entity::find()
        .filter(inventory_reservation::Column::OrderId.eq(receipt.order_id))
        .all(&*app.db())
        .await
        .expect("read holds");
    assert_eq!(holds.len(), 2);
    assert!(holds
        .iter()
        .all(|hold| hold.status == ReservationStatus::Committed));

    // Nothing is left for the stale-hold sweep to hand back.
    let open = app
        .state
        .services
        .ledger
        .stale_holds(Utc::now() + ChronoDuration::minutes(1))
        .await
        .expect("list holds");
    assert!(open.is_empty());
    assert_eq!(app.stock_of(cup.id).await, 6);
    assert_eq!(app.stock_of(plate.id).await, 8);
}

#[tokio::test]
async fn failed_order_insert_commits_no_holds_and_returns_the_coupon() {
    let app = TestApp::new().await;
    let pen = app.seed_variant("PEN-3", dec!(2.00), 10).await;
    app.seed_coupon("PENS", CouponType::Flat, dec!(1), Some(5))
        .await;
    let checkout = checkout_with_numbers(&app, scripted_numbers(&["ORD-SAME"]));

    app.add_to_cart("liam", pen.id, 1).await;
    checkout
        .checkout(&customer("liam"), checkout_request(Some("PENS")))
        .await
        .expect("first checkout takes the number");

    app.add_to_cart("maya", pen.id, 2).await;
    let err = checkout
        .checkout(&customer("maya"), checkout_request(Some("PENS")))
        .await
        .unwrap_err();
    assert_matches!(err, CheckoutError::Persistence(_));

    let coupons = app.state.services.coupons.list(1, 20).await.expect("list");
    assert_eq!(coupons.coupons[0].usage_count, 1);

    let committed = inventory_reservation::Entity::find()
        .filter(inventory_reservation::Column::Status.eq(ReservationStatus::Committed))
        .all(&*app.db())
        .await
        .expect("read holds");
    assert_eq!(committed.len(), 1);
    assert_eq!(app.stock_of(pen.id).await, 9);
}

#[tokio::test]
async fn lines_added_during_checkout_stay_in_the_cart() {
    let app = TestApp::new().await;
    let shirt = app.seed_variant("SHIRT-S", dec!(20.00), 10).await;
    let mug = app.seed_variant("MUG-2", dec!(12.50), 10).await;
    let hat = app.seed_variant("HAT-2", dec!(15.00), 10).await;
    app.add_to_cart("owen", shirt.id, 2).await;
    app.add_to_cart("owen", mug.id, 1).await;

    let (_, ordered) = app
        .state
        .services
        .carts
        .load_lines("owen")
        .await
        .expect("load lines")
        .expect("cart exists");

    // The user keeps shopping while the order is placed.
    app.add_to_cart("owen", shirt.id, 1).await;
    app.add_to_cart("owen", hat.id, 1).await;

    let removed = CartService::remove_ordered(&*app.db(), &ordered)
        .await
        .expect("remove ordered lines");
    assert_eq!(removed, 1);

    let cart = app.state.services.carts.view("owen").await.expect("cart");
    assert_eq!(cart.items.len(), 2);
    let shirt_line = cart
        .items
        .iter()
        .find(|line| line.variant_id == shirt.id)
        .expect("shirt keeps the extra unit");
    assert_eq!(shirt_line.quantity, 1);
    assert!(cart.items.iter().any(|line| line.variant_id == hat.id));
    assert!(cart.items.iter().all(|line| line.variant_id != mug.id));
}

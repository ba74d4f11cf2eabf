mod common;

use common::{checkout_request, customer, TestApp};
use rust_decimal_macros::dec;
use storefront_api::services::checkout::CheckoutError;
use storefront_api::services::inventory::{InventoryError, InventoryLedger};
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn twenty_checkouts_race_for_ten_units() {
    let app = TestApp::new().await;
    let variant = app.seed_variant("RACE-1", dec!(15.00), 10).await;

    for n in 0..20 {
        app.add_to_cart(&format!("racer-{}", n), variant.id, 1).await;
    }

    let mut tasks = vec![];
    for n in 0..20 {
        let checkout = app.state.services.checkout.clone();
        tasks.push(tokio::spawn(async move {
            checkout
                .checkout(&customer(&format!("racer-{}", n)), checkout_request(None))
                .await
        }));
    }

    let mut success = 0;
    let mut rejected = 0;
    for t in tasks {
        match t.await.expect("checkout task panicked") {
            Ok(_) => success += 1,
            Err(CheckoutError::InsufficientInventory { .. }) => rejected += 1,
            Err(other) => panic!("unexpected checkout failure: {}", other),
        }
    }

    assert_eq!(success, 10, "exactly 10 checkouts should succeed; got {}", success);
    assert_eq!(rejected, 10);
    assert_eq!(app.stock_of(variant.id).await, 0);
    assert_eq!(app.gateway.count(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_holds_never_drive_stock_negative() {
    let app = TestApp::new().await;
    let variant = app.seed_variant("RACE-2", dec!(5.00), 7).await;
    let ledger = app.state.services.ledger.clone();

    let mut tasks = vec![];
    for _ in 0..12 {
        let ledger = ledger.clone();
        let variant_id = variant.id;
        tasks.push(tokio::spawn(async move {
            ledger.reserve(Uuid::new_v4(), variant_id, 2).await
        }));
    }

    let mut granted = 0;
    for t in tasks {
        match t.await.expect("reserve task panicked") {
            Ok(_) => granted += 1,
            Err(InventoryError::InsufficientInventory { requested, .. }) => {
                assert_eq!(requested, 2)
            }
            Err(other) => panic!("unexpected ledger failure: {}", other),
        }
    }

    assert_eq!(granted, 3);
    assert_eq!(app.stock_of(variant.id).await, 1);
}

#[tokio::test]
async fn release_returns_stock_once() {
    let app = TestApp::new().await;
    let variant = app.seed_variant("REL-1", dec!(5.00), 4).await;
    let ledger = app.state.services.ledger.clone();

    let hold = ledger
        .reserve(Uuid::new_v4(), variant.id, 3)
        .await
        .expect("reserve");
    assert_eq!(app.stock_of(variant.id).await, 1);

    ledger.release(&hold).await.expect("first release");
    ledger.release(&hold).await.expect("second release is a no-op");
    assert_eq!(app.stock_of(variant.id).await, 4);
}

#[tokio::test]
async fn reserving_an_unknown_variant_fails() {
    let app = TestApp::new().await;
    let missing = Uuid::new_v4();

    let err = app
        .state
        .services
        .ledger
        .reserve(Uuid::new_v4(), missing, 1)
        .await
        .unwrap_err();

    assert!(matches!(err, InventoryError::UnitNotFound(id) if id == missing));
}

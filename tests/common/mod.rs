#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use serde_json::Value;
use storefront_api::{
    auth::{AuthConfig, AuthService, ROLE_ADMIN, ROLE_CUSTOMER},
    build_app,
    config::AppConfig,
    db,
    entities::coupon::CouponType,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        carts::AddItemRequest,
        catalog::{CreateVariantRequest, VariantView},
        checkout::{Address, CheckoutRequest, Customer},
        coupons::{CouponView, CreateCouponRequest},
        inventory::InventoryLedger,
        payments::in_memory::InMemoryGateway,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Application state over a private in-memory SQLite database and the
/// in-memory payment gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<InMemoryGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // Every connection to sqlite::memory: is its own database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(InMemoryGateway::new());
        let services = AppServices::new(
            db_arc.clone(),
            gateway.clone(),
            event_sender.clone(),
            &cfg.payment_currency,
        );
        let auth = Arc::new(AuthService::new(AuthConfig::from(&cfg)));

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
            auth,
        };

        Self {
            router: build_app(state.clone()),
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> Arc<DatabaseConnection> {
        self.state.db.clone()
    }

    pub fn customer_token(&self, user_id: &str) -> String {
        self.state
            .auth
            .issue_token(
                user_id,
                Some(format!("{}@example.com", user_id)),
                vec![ROLE_CUSTOMER.to_string()],
            )
            .expect("sign customer token")
    }

    pub fn admin_token(&self) -> String {
        self.state
            .auth
            .issue_token("admin-1", None, vec![ROLE_ADMIN.to_string()])
            .expect("sign admin token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_variant(&self, sku: &str, price: Decimal, stock: i32) -> VariantView {
        self.state
            .services
            .catalog
            .create_variant(CreateVariantRequest {
                product_id: None,
                sku: sku.to_string(),
                name: format!("Variant {}", sku),
                price,
                compare_at_price: None,
                inventory_quantity: stock,
                attributes: None,
            })
            .await
            .expect("seed product variant for tests")
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        coupon_type: CouponType,
        value: Decimal,
        usage_limit: Option<i32>,
    ) -> CouponView {
        let now = Utc::now();
        self.state
            .services
            .coupons
            .create(
                CreateCouponRequest {
                    code: code.to_string(),
                    coupon_type,
                    value,
                    min_order_value: Decimal::ZERO,
                    max_discount: None,
                    usage_limit,
                    valid_from: now - ChronoDuration::days(1),
                    valid_to: now + ChronoDuration::days(30),
                    is_active: true,
                },
                "admin-1",
            )
            .await
            .expect("seed coupon for tests")
    }

    pub async fn add_to_cart(&self, user_id: &str, variant_id: Uuid, quantity: i32) {
        self.state
            .services
            .carts
            .add_item(
                user_id,
                AddItemRequest {
                    variant_id,
                    quantity,
                },
            )
            .await
            .expect("add item to cart");
    }

    pub async fn stock_of(&self, variant_id: Uuid) -> i32 {
        self.state
            .services
            .ledger
            .available(variant_id)
            .await
            .expect("read stock")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn customer(user_id: &str) -> Customer {
    Customer {
        user_id: user_id.to_string(),
        email: Some(format!("{}@example.com", user_id)),
    }
}

pub fn address() -> Address {
    Address::from([
        ("line1".to_string(), "1 Main St".to_string()),
        ("city".to_string(), "Springfield".to_string()),
        ("postal_code".to_string(), "12345".to_string()),
        ("country".to_string(), "US".to_string()),
    ])
}

pub fn checkout_request(coupon_code: Option<&str>) -> CheckoutRequest {
    CheckoutRequest {
        shipping_address: address(),
        billing_address: None,
        coupon_code: coupon_code.map(str::to_string),
    }
}

pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}

pub mod admin;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod common;
pub mod coupons;
pub mod orders;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::events::EventSender;
use crate::services::{
    activity::ActivityLogger,
    carts::CartService,
    catalog::CatalogService,
    checkout::CheckoutService,
    coupons::CouponService,
    inventory::{InventoryLedger, SeaOrmInventoryLedger},
    orders::OrderService,
    payments::PaymentGateway,
};

pub use crate::AppState;

/// Services layer used by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub ledger: Arc<dyn InventoryLedger>,
    pub carts: Arc<CartService>,
    pub catalog: Arc<CatalogService>,
    pub coupons: Arc<CouponService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub activity: Arc<ActivityLogger>,
}

impl AppServices {
    /// Wires every service onto one database pool, gateway and event channel.
    pub fn new(
        db_pool: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        currency: &str,
    ) -> Self {
        let ledger: Arc<dyn InventoryLedger> =
            Arc::new(SeaOrmInventoryLedger::new(db_pool.clone()));
        Self::with_ledger(db_pool, ledger, gateway, event_sender, currency)
    }

    pub fn with_ledger(
        db_pool: Arc<DatabaseConnection>,
        ledger: Arc<dyn InventoryLedger>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        currency: &str,
    ) -> Self {
        let activity = ActivityLogger::new(db_pool.clone());
        let carts = CartService::new(db_pool.clone());
        let coupons = CouponService::new(db_pool.clone());

        let checkout = CheckoutService::new(
            db_pool.clone(),
            carts.clone(),
            ledger.clone(),
            coupons.clone(),
            gateway.clone(),
            activity.clone(),
            event_sender.clone(),
            currency,
        );
        let orders = OrderService::new(
            db_pool.clone(),
            gateway,
            activity.clone(),
            event_sender,
        );

        Self {
            catalog: Arc::new(CatalogService::new(db_pool, ledger.clone())),
            ledger,
            carts: Arc::new(carts),
            coupons: Arc::new(coupons),
            checkout: Arc::new(checkout),
            orders: Arc::new(orders),
            activity: Arc::new(activity),
        }
    }
}

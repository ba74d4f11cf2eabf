//! Checkout orchestration.
//!
//! Turns a user's cart into a pending order plus a gateway authorization.
//! Stock holds, the coupon claim, the gateway call and the order row are
//! separate writes, so every failure after the first hold releases what was
//! taken before the error is returned. The order row and the commit of its
//! holds share one transaction.

use chrono::Utc;
use metrics::counter;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, Set, SqlErr, TransactionTrait};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{self, OrderStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::activity::ActivityLogger;
use crate::services::carts::CartService;
use crate::services::coupons::{CouponApplication, CouponError, CouponService};
use crate::services::inventory::{commit_holds, InventoryError, InventoryLedger, Reservation};
use crate::services::payments::{GatewayError, PaymentGateway};
use crate::services::pricing::{self, LineItem, PriceBreakdown};

/// Address keys every shipping and billing address must carry.
pub const REQUIRED_ADDRESS_KEYS: [&str; 4] = ["line1", "city", "postal_code", "country"];

pub type Address = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("Cart is empty")]
    EmptyCart,
    #[error("Variant {0} not found")]
    UnitNotFound(Uuid),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Insufficient inventory: variant {variant_id} (requested {requested}, available {available})")]
    InsufficientInventory {
        variant_id: Uuid,
        requested: i32,
        available: i32,
    },
    #[error("Payment setup failed: {0}")]
    PaymentSetupFailed(#[from] GatewayError),
    #[error("Persistence failure: {0}")]
    Persistence(#[from] DbErr),
}

impl From<CheckoutError> for ServiceError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::EmptyCart
            | CheckoutError::UnitNotFound(_)
            | CheckoutError::InvalidAddress(_) => ServiceError::ValidationError(err.to_string()),
            CheckoutError::InsufficientInventory { .. } => {
                ServiceError::InsufficientStock(err.to_string())
            }
            CheckoutError::PaymentSetupFailed(gateway) => {
                ServiceError::PaymentSetupFailed(gateway.to_string())
            }
            CheckoutError::Persistence(db) => ServiceError::DatabaseError(db),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    #[schema(value_type = Object)]
    pub shipping_address: Address,
    /// Defaults to the shipping address.
    #[schema(value_type = Option<Object>)]
    pub billing_address: Option<Address>,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutReceipt {
    pub order_id: Uuid,
    pub order_number: String,
    /// Continuation token for the client-side payment step.
    pub client_secret: String,
    pub total: Decimal,
    pub currency: String,
}

/// Customer placing the order, as established by authentication.
#[derive(Debug, Clone)]
pub struct Customer {
    pub user_id: String,
    pub email: Option<String>,
}

pub type OrderNumberFn = Arc<dyn Fn() -> String + Send + Sync>;

/// `ORD-<yyyymmdd>-<8 hex digits>`.
pub fn generate_order_number() -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("ORD-{}-{:08X}", Utc::now().format("%Y%m%d"), suffix)
}

pub fn validate_address(label: &str, address: &Address) -> Result<(), CheckoutError> {
    if address.is_empty() {
        return Err(CheckoutError::InvalidAddress(format!("{} is required", label)));
    }
    for key in REQUIRED_ADDRESS_KEYS {
        if address.get(key).map_or(true, |value| value.trim().is_empty()) {
            return Err(CheckoutError::InvalidAddress(format!(
                "{} is missing {}",
                label, key
            )));
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct CheckoutService {
    db_pool: Arc<DatabaseConnection>,
    carts: CartService,
    ledger: Arc<dyn InventoryLedger>,
    coupons: CouponService,
    gateway: Arc<dyn PaymentGateway>,
    activity: ActivityLogger,
    events: EventSender,
    currency: String,
    order_numbers: OrderNumberFn,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: Arc<DatabaseConnection>,
        carts: CartService,
        ledger: Arc<dyn InventoryLedger>,
        coupons: CouponService,
        gateway: Arc<dyn PaymentGateway>,
        activity: ActivityLogger,
        events: EventSender,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            db_pool,
            carts,
            ledger,
            coupons,
            gateway,
            activity,
            events,
            currency: currency.into(),
            order_numbers: Arc::new(generate_order_number),
        }
    }

    /// Replaces the order number generator.
    pub fn with_order_numbers(mut self, order_numbers: OrderNumberFn) -> Self {
        self.order_numbers = order_numbers;
        self
    }

    #[instrument(skip(self, customer, request), fields(user_id = %customer.user_id, checkout_id = tracing::field::Empty))]
    pub async fn checkout(
        &self,
        customer: &Customer,
        request: CheckoutRequest,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let result = self.run(customer, request).await;
        match &result {
            Ok(_) => counter!("storefront.checkout.completed", 1),
            Err(e) => {
                counter!("storefront.checkout.failed", 1);
                info!(error = %e, "checkout failed");
            }
        }
        result
    }

    async fn run(
        &self,
        customer: &Customer,
        request: CheckoutRequest,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        validate_address("shipping_address", &request.shipping_address)?;
        let billing_address = match request.billing_address {
            Some(billing) if !billing.is_empty() => {
                validate_address("billing_address", &billing)?;
                billing
            }
            _ => request.shipping_address.clone(),
        };

        let lines = match self.carts.load_lines(&customer.user_id).await? {
            Some((_, lines)) if !lines.is_empty() => lines,
            _ => return Err(CheckoutError::EmptyCart),
        };

        let checkout_id = Uuid::new_v4();
        tracing::Span::current().record("checkout_id", tracing::field::display(checkout_id));

        // Stock holds, item by item.
        let mut held: Vec<Reservation> = Vec::with_capacity(lines.len());
        for line in &lines {
            let variant_id = line.item.variant_id;
            if line.variant.is_none() {
                self.release_all(&held).await;
                return Err(CheckoutError::UnitNotFound(variant_id));
            }

            match self
                .ledger
                .reserve(checkout_id, variant_id, line.item.quantity)
                .await
            {
                Ok(reservation) => {
                    self.events
                        .send_or_log(Event::InventoryReserved {
                            checkout_id,
                            variant_id,
                            quantity: reservation.quantity,
                        })
                        .await;
                    held.push(reservation);
                }
                Err(err) => {
                    self.release_all(&held).await;
                    return Err(match err {
                        InventoryError::InsufficientInventory {
                            variant_id,
                            requested,
                            available,
                        } => CheckoutError::InsufficientInventory {
                            variant_id,
                            requested,
                            available,
                        },
                        InventoryError::UnitNotFound(id) => CheckoutError::UnitNotFound(id),
                        InventoryError::InvalidQuantity(_) => {
                            CheckoutError::UnitNotFound(variant_id)
                        }
                        InventoryError::Database(db) => CheckoutError::Persistence(db),
                    });
                }
            }
        }

        // Pricing, with the coupon folded in only if it validates and a use
        // can still be claimed.
        let items: Vec<LineItem> = lines.iter().map(|line| line.to_line_item()).collect();
        let coupon = match self
            .claim_coupon(request.coupon_code.as_deref(), pricing::subtotal(&items))
            .await
        {
            Ok(coupon) => coupon,
            Err(db) => {
                self.release_all(&held).await;
                return Err(CheckoutError::Persistence(db));
            }
        };
        let breakdown = pricing::compute(&items, coupon.as_ref().map(|c| &c.policy));

        // Gateway authorization. No lock or transaction is held across this call.
        let amount_minor = match breakdown.total_minor_units() {
            Some(amount) => amount,
            None => {
                self.unwind(&held, coupon.as_ref()).await;
                return Err(CheckoutError::PaymentSetupFailed(GatewayError::Rejected(
                    "amount out of range".to_string(),
                )));
            }
        };
        let mut metadata = HashMap::from([
            ("user_id".to_string(), customer.user_id.clone()),
            ("checkout_id".to_string(), checkout_id.to_string()),
        ]);
        if let Some(email) = &customer.email {
            metadata.insert("email".to_string(), email.clone());
        }

        let authorization = match self
            .gateway
            .create_authorization(amount_minor, &self.currency, metadata)
            .await
        {
            Ok(authorization) => authorization,
            Err(err) => {
                warn!(error = %err, "payment authorization failed");
                self.unwind(&held, coupon.as_ref()).await;
                return Err(CheckoutError::PaymentSetupFailed(err));
            }
        };

        let order = match self
            .persist_order(
                customer,
                checkout_id,
                held.len(),
                &breakdown,
                coupon.as_ref(),
                &authorization.id,
                &request.shipping_address,
                &billing_address,
            )
            .await
        {
            Ok(order) => order,
            Err(err) => {
                error!(
                    authorization_id = %authorization.id,
                    %checkout_id,
                    user_id = %customer.user_id,
                    error = %err,
                    reconciliation_required = true,
                    "order persistence failed after payment authorization"
                );
                self.events
                    .send_or_log(Event::PaymentAuthorizationOrphaned {
                        authorization_id: authorization.id.clone(),
                        checkout_id,
                        user_id: customer.user_id.clone(),
                        reason: err.to_string(),
                    })
                    .await;
                self.unwind(&held, coupon.as_ref()).await;
                return Err(CheckoutError::Persistence(err));
            }
        };

        // The order exists from here on; later failures are logged, not returned.
        if let Some(application) = &coupon {
            self.events
                .send_or_log(Event::CouponRedeemed {
                    code: application.code.clone(),
                    order_id: order.id,
                })
                .await;
        }

        match CartService::remove_ordered(&*self.db_pool, &lines).await {
            Ok(_) => {
                self.events
                    .send_or_log(Event::CartCleared {
                        user_id: customer.user_id.clone(),
                    })
                    .await;
            }
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "failed to remove ordered cart lines")
            }
        }

        self.activity.record(
            &customer.user_id,
            "checkout",
            "order",
            order.id,
            json!({
                "order_number": order.order_number,
                "total": order.total,
                "coupon_code": order.coupon_code,
            }),
        );
        self.events
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                order_number: order.order_number.clone(),
                total: order.total,
            })
            .await;
        info!(order_id = %order.id, order_number = %order.order_number, "checkout completed");

        Ok(CheckoutReceipt {
            order_id: order.id,
            order_number: order.order_number,
            client_secret: authorization.client_secret,
            total: breakdown.total,
            currency: self.currency.clone(),
        })
    }

    /// Inserts the pending order and commits the checkout's holds to it in
    /// one transaction. A clash on the order number gets one retry with a
    /// fresh number.
    #[allow(clippy::too_many_arguments)]
    async fn persist_order(
        &self,
        customer: &Customer,
        checkout_id: Uuid,
        hold_count: usize,
        breakdown: &PriceBreakdown,
        coupon: Option<&CouponApplication>,
        authorization_id: &str,
        shipping_address: &Address,
        billing_address: &Address,
    ) -> Result<order::Model, DbErr> {
        let items = serde_json::to_value(&breakdown.lines)
            .map_err(|e| DbErr::Custom(format!("failed to encode order lines: {}", e)))?;
        let shipping = serde_json::to_value(shipping_address)
            .map_err(|e| DbErr::Custom(format!("failed to encode address: {}", e)))?;
        let billing = serde_json::to_value(billing_address)
            .map_err(|e| DbErr::Custom(format!("failed to encode address: {}", e)))?;

        let mut retried = false;
        loop {
            let now = Utc::now();
            let order_number = (self.order_numbers)();
            let model = order::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_number: Set(order_number.clone()),
                user_id: Set(customer.user_id.clone()),
                items: Set(items.clone()),
                subtotal: Set(breakdown.subtotal),
                discount: Set(breakdown.discount),
                tax: Set(breakdown.tax),
                shipping: Set(breakdown.shipping),
                total: Set(breakdown.total),
                currency: Set(self.currency.clone()),
                coupon_code: Set(coupon.map(|c| c.code.clone())),
                status: Set(OrderStatus::Pending),
                payment_status: Set(PaymentStatus::Pending),
                payment_intent_id: Set(Some(authorization_id.to_string())),
                shipping_address: Set(shipping.clone()),
                billing_address: Set(billing.clone()),
                created_at: Set(now),
                updated_at: Set(now),
            };

            let txn = self.db_pool.begin().await?;
            let order = match model.insert(&txn).await {
                Ok(order) => order,
                Err(err)
                    if !retried
                        && matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) =>
                {
                    txn.rollback().await?;
                    warn!(%order_number, "order number collision, retrying");
                    retried = true;
                    continue;
                }
                Err(err) => {
                    txn.rollback().await?;
                    return Err(err);
                }
            };

            let committed = match commit_holds(&txn, checkout_id, order.id).await {
                Ok(committed) => committed,
                Err(err) => {
                    txn.rollback().await?;
                    return Err(err);
                }
            };
            if committed != hold_count as u64 {
                txn.rollback().await?;
                return Err(DbErr::Custom(format!(
                    "expected {} held reservations for checkout {}, found {}",
                    hold_count, checkout_id, committed
                )));
            }
            txn.commit().await?;
            return Ok(order);
        }
    }

    /// Validates the coupon and claims one use of it. A coupon that fails
    /// validation or has no uses left is skipped; only database errors fail.
    async fn claim_coupon(
        &self,
        code: Option<&str>,
        subtotal: Decimal,
    ) -> Result<Option<CouponApplication>, DbErr> {
        let code = match code.map(str::trim) {
            Some(code) if !code.is_empty() => code,
            _ => return Ok(None),
        };

        let application = match self.coupons.validate(code, subtotal, Utc::now()).await {
            Ok(application) => application,
            Err(CouponError::Database(db)) => return Err(db),
            Err(reason) => {
                info!(code, %reason, "coupon not applied");
                return Ok(None);
            }
        };

        match self.coupons.commit_usage(&application.code).await {
            Ok(()) => Ok(Some(application)),
            Err(CouponError::Database(db)) => Err(db),
            Err(reason) => {
                info!(code, %reason, "coupon not applied");
                Ok(None)
            }
        }
    }

    /// Undoes a checkout that failed after the coupon was claimed.
    async fn unwind(&self, held: &[Reservation], coupon: Option<&CouponApplication>) {
        self.release_all(held).await;
        if let Some(application) = coupon {
            match self.coupons.release_usage(&application.code).await {
                Ok(()) => {
                    self.events
                        .send_or_log(Event::CouponReleased {
                            code: application.code.clone(),
                        })
                        .await;
                }
                Err(e) => {
                    error!(
                        code = %application.code,
                        error = %e,
                        reconciliation_required = true,
                        "failed to release coupon use"
                    );
                }
            }
        }
    }

    /// Best-effort compensation: every hold is attempted even if one fails.
    async fn release_all(&self, held: &[Reservation]) {
        for reservation in held.iter().rev() {
            match self.ledger.release(reservation).await {
                Ok(()) => {
                    self.events
                        .send_or_log(Event::InventoryReleased {
                            checkout_id: reservation.checkout_id,
                            variant_id: reservation.variant_id,
                            quantity: reservation.quantity,
                        })
                        .await;
                }
                Err(e) => {
                    error!(
                        reservation_id = %reservation.id,
                        variant_id = %reservation.variant_id,
                        error = %e,
                        reconciliation_required = true,
                        "failed to release inventory hold"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn address() -> Address {
        Address::from([
            ("line1".to_string(), "12 MG Road".to_string()),
            ("city".to_string(), "Bengaluru".to_string()),
            ("postal_code".to_string(), "560001".to_string()),
            ("country".to_string(), "IN".to_string()),
        ])
    }

    #[test]
    fn complete_address_is_accepted() {
        assert!(validate_address("shipping_address", &address()).is_ok());
    }

    #[test]
    fn empty_or_partial_address_is_rejected() {
        assert_matches!(
            validate_address("shipping_address", &Address::new()),
            Err(CheckoutError::InvalidAddress(_))
        );

        let mut partial = address();
        partial.insert("city".to_string(), "  ".to_string());
        let err = validate_address("shipping_address", &partial).unwrap_err();
        assert!(err.to_string().contains("city"));
    }

    #[test]
    fn order_numbers_are_date_stamped() {
        let number = generate_order_number();
        let today = Utc::now().format("%Y%m%d").to_string();
        assert!(number.starts_with(&format!("ORD-{}-", today)));
        assert_eq!(number.len(), "ORD-".len() + 8 + 1 + 8);
    }

    #[test]
    fn error_statuses() {
        use axum::http::StatusCode;
        assert_eq!(
            ServiceError::from(CheckoutError::EmptyCart).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::from(CheckoutError::PaymentSetupFailed(GatewayError::Timeout))
                .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

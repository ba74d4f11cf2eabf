//! Inventory ledger.
//!
//! Stock lives on `product_variants.inventory_quantity`. Every hold taken by a
//! checkout is also written to `inventory_reservations` so holds left behind
//! by a crash can be found and released later.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entities::inventory_reservation::{
    self, Entity as ReservationEntity, ReservationStatus,
};
use crate::entities::product_variant::{self, Entity as VariantEntity};
use crate::errors::ServiceError;

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Insufficient inventory: variant {variant_id} (requested {requested}, available {available})")]
    InsufficientInventory {
        variant_id: Uuid,
        requested: i32,
        available: i32,
    },
    #[error("Variant {0} not found")]
    UnitNotFound(Uuid),
    #[error("Quantity must be positive, got {0}")]
    InvalidQuantity(i32),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl From<InventoryError> for ServiceError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::InsufficientInventory { .. } => {
                ServiceError::InsufficientStock(err.to_string())
            }
            InventoryError::UnitNotFound(_) => ServiceError::NotFound(err.to_string()),
            InventoryError::InvalidQuantity(_) => ServiceError::ValidationError(err.to_string()),
            InventoryError::Database(db) => ServiceError::DatabaseError(db),
        }
    }
}

/// A hold on stock, released or committed as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Uuid,
    pub checkout_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i32,
}

impl From<inventory_reservation::Model> for Reservation {
    fn from(model: inventory_reservation::Model) -> Self {
        Self {
            id: model.id,
            checkout_id: model.checkout_id,
            variant_id: model.variant_id,
            quantity: model.quantity,
        }
    }
}

/// Marks every `held` hold of `checkout_id` as committed to `order_id`.
///
/// Takes a connection so it can run inside the transaction that inserts the
/// order.
pub async fn commit_holds<C: ConnectionTrait>(
    db: &C,
    checkout_id: Uuid,
    order_id: Uuid,
) -> Result<u64, DbErr> {
    let result = ReservationEntity::update_many()
        .col_expr(
            inventory_reservation::Column::Status,
            Expr::value(ReservationStatus::Committed),
        )
        .col_expr(inventory_reservation::Column::OrderId, Expr::value(order_id))
        .col_expr(inventory_reservation::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(inventory_reservation::Column::CheckoutId.eq(checkout_id))
        .filter(inventory_reservation::Column::Status.eq(ReservationStatus::Held))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Takes `quantity` units off `variant_id` if at least that many are available.
    async fn reserve(
        &self,
        checkout_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<Reservation, InventoryError>;

    /// Returns a hold's units to stock. Releasing twice is a no-op.
    async fn release(&self, reservation: &Reservation) -> Result<(), InventoryError>;

    /// Adds stock and returns the new quantity.
    async fn restock(&self, variant_id: Uuid, quantity: i32) -> Result<i32, InventoryError>;

    /// Current stock for `variant_id`.
    async fn available(&self, variant_id: Uuid) -> Result<i32, InventoryError>;

    /// Holds still `held` that were taken before `older_than`.
    async fn stale_holds(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<inventory_reservation::Model>, InventoryError>;
}

#[derive(Clone)]
pub struct SeaOrmInventoryLedger {
    db_pool: Arc<DatabaseConnection>,
}

impl SeaOrmInventoryLedger {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl InventoryLedger for SeaOrmInventoryLedger {
    #[instrument(skip(self))]
    async fn reserve(
        &self,
        checkout_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<Reservation, InventoryError> {
        if quantity <= 0 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }

        let txn = self.db_pool.begin().await?;

        // Check and decrement in one statement; a read-then-write here oversells.
        let updated = VariantEntity::update_many()
            .col_expr(
                product_variant::Column::InventoryQuantity,
                Expr::col(product_variant::Column::InventoryQuantity).sub(quantity),
            )
            .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product_variant::Column::Id.eq(variant_id))
            .filter(product_variant::Column::InventoryQuantity.gte(quantity))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            let variant = VariantEntity::find_by_id(variant_id).one(&txn).await?;
            txn.rollback().await?;
            return match variant {
                None => Err(InventoryError::UnitNotFound(variant_id)),
                Some(variant) => {
                    counter!("storefront.inventory.reserve_rejected", 1);
                    debug!(available = variant.inventory_quantity, "reservation rejected");
                    Err(InventoryError::InsufficientInventory {
                        variant_id,
                        requested: quantity,
                        available: variant.inventory_quantity,
                    })
                }
            };
        }

        let now = Utc::now();
        let hold = inventory_reservation::ActiveModel {
            id: Set(Uuid::new_v4()),
            checkout_id: Set(checkout_id),
            variant_id: Set(variant_id),
            quantity: Set(quantity),
            status: Set(ReservationStatus::Held),
            order_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(hold.into())
    }

    #[instrument(skip(self), fields(reservation_id = %reservation.id))]
    async fn release(&self, reservation: &Reservation) -> Result<(), InventoryError> {
        let txn = self.db_pool.begin().await?;

        let flipped = ReservationEntity::update_many()
            .col_expr(
                inventory_reservation::Column::Status,
                Expr::value(ReservationStatus::Released),
            )
            .col_expr(inventory_reservation::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(inventory_reservation::Column::Id.eq(reservation.id))
            .filter(inventory_reservation::Column::Status.eq(ReservationStatus::Held))
            .exec(&txn)
            .await?;

        if flipped.rows_affected == 0 {
            txn.rollback().await?;
            warn!("reservation already settled, nothing to release");
            return Ok(());
        }

        VariantEntity::update_many()
            .col_expr(
                product_variant::Column::InventoryQuantity,
                Expr::col(product_variant::Column::InventoryQuantity).add(reservation.quantity),
            )
            .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product_variant::Column::Id.eq(reservation.variant_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn restock(&self, variant_id: Uuid, quantity: i32) -> Result<i32, InventoryError> {
        if quantity <= 0 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }

        let txn = self.db_pool.begin().await?;
        let result = VariantEntity::update_many()
            .col_expr(
                product_variant::Column::InventoryQuantity,
                Expr::col(product_variant::Column::InventoryQuantity).add(quantity),
            )
            .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product_variant::Column::Id.eq(variant_id))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Err(InventoryError::UnitNotFound(variant_id));
        }

        let variant = VariantEntity::find_by_id(variant_id)
            .one(&txn)
            .await?
            .ok_or(InventoryError::UnitNotFound(variant_id))?;
        txn.commit().await?;
        Ok(variant.inventory_quantity)
    }

    async fn available(&self, variant_id: Uuid) -> Result<i32, InventoryError> {
        VariantEntity::find_by_id(variant_id)
            .one(&*self.db_pool)
            .await?
            .map(|variant| variant.inventory_quantity)
            .ok_or(InventoryError::UnitNotFound(variant_id))
    }

    async fn stale_holds(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<inventory_reservation::Model>, InventoryError> {
        Ok(ReservationEntity::find()
            .filter(inventory_reservation::Column::Status.eq(ReservationStatus::Held))
            .filter(inventory_reservation::Column::CreatedAt.lt(older_than))
            .order_by_asc(inventory_reservation::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }
}

//! Variant reads and the admin seed/restock operations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, SqlErr};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::product_variant::{self, Entity as VariantEntity};
use crate::errors::ServiceError;
use crate::services::inventory::InventoryLedger;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VariantView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub price: Decimal,
    pub compare_at_price: Option<Decimal>,
    pub inventory_quantity: i32,
    #[schema(value_type = Object)]
    pub attributes: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<product_variant::Model> for VariantView {
    fn from(model: product_variant::Model) -> Self {
        Self {
            id: model.id,
            product_id: model.product_id,
            sku: model.sku,
            name: model.name,
            price: model.price,
            compare_at_price: model.compare_at_price,
            inventory_quantity: model.inventory_quantity,
            attributes: model.attributes,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateVariantRequest {
    pub product_id: Option<Uuid>,
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub price: Decimal,
    pub compare_at_price: Option<Decimal>,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub inventory_quantity: i32,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub attributes: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RestockRequest {
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Clone)]
pub struct CatalogService {
    db_pool: Arc<DatabaseConnection>,
    ledger: Arc<dyn InventoryLedger>,
}

impl CatalogService {
    pub fn new(db_pool: Arc<DatabaseConnection>, ledger: Arc<dyn InventoryLedger>) -> Self {
        Self { db_pool, ledger }
    }

    pub async fn get_variant(&self, id: Uuid) -> Result<VariantView, ServiceError> {
        VariantEntity::find_by_id(id)
            .one(&*self.db_pool)
            .await?
            .map(VariantView::from)
            .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", id)))
    }

    #[instrument(skip(self, request), fields(sku = %request.sku))]
    pub async fn create_variant(
        &self,
        request: CreateVariantRequest,
    ) -> Result<VariantView, ServiceError> {
        request.validate()?;
        if request.price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "price must not be negative".to_string(),
            ));
        }

        let now = Utc::now();
        let variant = product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(request.product_id.unwrap_or_else(Uuid::new_v4)),
            sku: Set(request.sku),
            name: Set(request.name),
            price: Set(request.price),
            compare_at_price: Set(request.compare_at_price),
            inventory_quantity: Set(request.inventory_quantity),
            attributes: Set(request
                .attributes
                .unwrap_or_else(|| Value::Object(Default::default()))),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db_pool)
        .await
        .map_err(|err| {
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                ServiceError::ValidationError("SKU already exists".to_string())
            } else {
                ServiceError::DatabaseError(err)
            }
        })?;

        info!(variant_id = %variant.id, "variant created");
        Ok(variant.into())
    }

    /// Adds stock through the ledger and returns the updated variant.
    #[instrument(skip(self))]
    pub async fn restock(&self, id: Uuid, quantity: i32) -> Result<VariantView, ServiceError> {
        self.ledger.restock(id, quantity).await?;
        self.get_variant(id).await
    }
}

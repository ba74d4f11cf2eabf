//! Per-user carts. Checkout reads them and removes what it ordered.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::cart::{self, Entity as CartEntity};
use crate::entities::cart_item::{self, Entity as CartItemEntity};
use crate::entities::product_variant::{self, Entity as VariantEntity};
use crate::errors::ServiceError;
use crate::services::pricing::{self, LineItem, PriceBreakdown};

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddItemRequest {
    pub variant_id: Uuid,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartLineView {
    pub variant_id: Uuid,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub cart_id: Uuid,
    pub user_id: String,
    pub items: Vec<CartLineView>,
    /// Totals before any coupon.
    pub pricing: PriceBreakdown,
}

/// A cart line joined with its variant, as checkout consumes it.
#[derive(Debug, Clone)]
pub struct CartLine {
    pub item: cart_item::Model,
    pub variant: Option<product_variant::Model>,
}

impl CartLine {
    pub fn sku(&self) -> String {
        self.variant
            .as_ref()
            .map(|variant| variant.sku.clone())
            .unwrap_or_default()
    }

    pub fn to_line_item(&self) -> LineItem {
        LineItem {
            variant_id: self.item.variant_id,
            sku: self.sku(),
            quantity: self.item.quantity,
            unit_price: self.item.unit_price,
        }
    }
}

#[derive(Clone)]
pub struct CartService {
    db_pool: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }

    async fn find_cart(&self, user_id: &str) -> Result<Option<cart::Model>, DbErr> {
        CartEntity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db_pool)
            .await
    }

    async fn get_or_create(&self, user_id: &str) -> Result<cart::Model, ServiceError> {
        if let Some(cart) = self.find_cart(user_id).await? {
            return Ok(cart);
        }

        let now = Utc::now();
        let created = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db_pool)
        .await;

        match created {
            Ok(cart) => Ok(cart),
            // Another request created it first.
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                self.find_cart(user_id)
                    .await?
                    .ok_or_else(|| ServiceError::InternalError("cart vanished".to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Lines of the user's cart with their variants, or `None` when no cart exists.
    pub async fn load_lines(
        &self,
        user_id: &str,
    ) -> Result<Option<(cart::Model, Vec<CartLine>)>, DbErr> {
        let Some(cart) = self.find_cart(user_id).await? else {
            return Ok(None);
        };

        let lines = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(VariantEntity)
            .all(&*self.db_pool)
            .await?
            .into_iter()
            .map(|(item, variant)| CartLine { item, variant })
            .collect();

        Ok(Some((cart, lines)))
    }

    /// Removes the quantities a checkout ordered. A line that grew after
    /// `lines` was read keeps the extra units; lines added since are untouched.
    pub async fn remove_ordered<C: ConnectionTrait>(
        db: &C,
        lines: &[CartLine],
    ) -> Result<u64, DbErr> {
        let mut removed = 0;
        for line in lines {
            let item = &line.item;
            let deleted = CartItemEntity::delete_many()
                .filter(cart_item::Column::Id.eq(item.id))
                .filter(cart_item::Column::Quantity.lte(item.quantity))
                .exec(db)
                .await?;
            if deleted.rows_affected > 0 {
                removed += deleted.rows_affected;
                continue;
            }

            CartItemEntity::update_many()
                .col_expr(
                    cart_item::Column::Quantity,
                    Expr::col(cart_item::Column::Quantity).sub(item.quantity),
                )
                .col_expr(cart_item::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(cart_item::Column::Id.eq(item.id))
                .filter(cart_item::Column::Quantity.gt(item.quantity))
                .exec(db)
                .await?;
        }
        Ok(removed)
    }

    #[instrument(skip(self))]
    pub async fn view(&self, user_id: &str) -> Result<CartView, ServiceError> {
        let cart = self.get_or_create(user_id).await?;
        let lines = self
            .load_lines(user_id)
            .await?
            .map(|(_, lines)| lines)
            .unwrap_or_default();

        let items: Vec<CartLineView> = lines
            .iter()
            .map(|line| CartLineView {
                variant_id: line.item.variant_id,
                sku: line.sku(),
                name: line
                    .variant
                    .as_ref()
                    .map(|variant| variant.name.clone())
                    .unwrap_or_default(),
                quantity: line.item.quantity,
                unit_price: line.item.unit_price,
                line_total: pricing::money(
                    line.item.unit_price * Decimal::from(line.item.quantity),
                ),
            })
            .collect();
        let line_items: Vec<LineItem> = lines.iter().map(CartLine::to_line_item).collect();

        Ok(CartView {
            cart_id: cart.id,
            user_id: cart.user_id,
            items,
            pricing: pricing::compute(&line_items, None),
        })
    }

    /// Adds `quantity` of a variant, merging with an existing line. The price
    /// snapshot is taken when the line is first created.
    #[instrument(skip(self, request), fields(variant_id = %request.variant_id))]
    pub async fn add_item(
        &self,
        user_id: &str,
        request: AddItemRequest,
    ) -> Result<CartView, ServiceError> {
        request.validate()?;
        let variant = VariantEntity::find_by_id(request.variant_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Variant {} not found", request.variant_id))
            })?;

        let cart = self.get_or_create(user_id).await?;
        let existing = CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::VariantId.eq(variant.id))
            .one(&*self.db_pool)
            .await?;

        let wanted = existing.as_ref().map(|item| item.quantity).unwrap_or(0) + request.quantity;
        if variant.inventory_quantity < wanted {
            return Err(ServiceError::InsufficientStock(format!(
                "Insufficient inventory: variant {} (requested {}, available {})",
                variant.id, wanted, variant.inventory_quantity
            )));
        }

        let now = Utc::now();
        match existing {
            Some(item) => {
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(wanted);
                active.updated_at = Set(now);
                active.update(&*self.db_pool).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    variant_id: Set(variant.id),
                    quantity: Set(request.quantity),
                    unit_price: Set(variant.price),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&*self.db_pool)
                .await?;
            }
        }
        self.touch(cart.id).await?;
        debug!(quantity = wanted, "cart line saved");

        self.view(user_id).await
    }

    /// Sets a line's quantity; zero or less removes the line.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        user_id: &str,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        let item = self.find_line(user_id, variant_id).await?;
        if quantity <= 0 {
            CartItemEntity::delete_by_id(item.id)
                .exec(&*self.db_pool)
                .await?;
        } else {
            let available = VariantEntity::find_by_id(variant_id)
                .one(&*self.db_pool)
                .await?
                .map(|variant| variant.inventory_quantity)
                .unwrap_or(0);
            if available < quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "Insufficient inventory: variant {} (requested {}, available {})",
                    variant_id, quantity, available
                )));
            }
            let cart_id = item.cart_id;
            let mut active: cart_item::ActiveModel = item.into();
            active.quantity = Set(quantity);
            active.updated_at = Set(Utc::now());
            active.update(&*self.db_pool).await?;
            self.touch(cart_id).await?;
        }
        self.view(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: &str, variant_id: Uuid) -> Result<CartView, ServiceError> {
        let item = self.find_line(user_id, variant_id).await?;
        CartItemEntity::delete_by_id(item.id)
            .exec(&*self.db_pool)
            .await?;
        self.view(user_id).await
    }

    async fn find_line(
        &self,
        user_id: &str,
        variant_id: Uuid,
    ) -> Result<cart_item::Model, ServiceError> {
        let cart = self
            .find_cart(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;
        CartItemEntity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::VariantId.eq(variant_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Item not found in cart".to_string()))
    }

    async fn touch(&self, cart_id: Uuid) -> Result<(), DbErr> {
        CartEntity::update_many()
            .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart::Column::Id.eq(cart_id))
            .exec(&*self.db_pool)
            .await?;
        Ok(())
    }
}

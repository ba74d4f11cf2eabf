//! Coupon validation and usage accounting.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, SqlErr,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::coupon::{self, CouponType, Entity as CouponEntity};
use crate::errors::ServiceError;
use crate::services::pricing::DiscountPolicy;

#[derive(Error, Debug)]
pub enum CouponError {
    #[error("Invalid coupon")]
    NotFound,
    #[error("Coupon expired")]
    Expired,
    #[error("Order subtotal is below the coupon minimum of {minimum}")]
    BelowMinimum { minimum: Decimal },
    #[error("Coupon usage limit reached")]
    LimitReached,
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl From<CouponError> for ServiceError {
    fn from(err: CouponError) -> Self {
        match err {
            CouponError::NotFound => ServiceError::NotFound(err.to_string()),
            CouponError::Database(db) => ServiceError::DatabaseError(db),
            other => ServiceError::ValidationError(other.to_string()),
        }
    }
}

/// A coupon that passed validation, with the discount it grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponApplication {
    pub coupon_id: Uuid,
    pub code: String,
    pub policy: DiscountPolicy,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateCouponRequest {
    #[validate(length(min = 3, max = 50))]
    pub code: String,
    pub coupon_type: CouponType,
    pub value: Decimal,
    #[serde(default)]
    pub min_order_value: Decimal,
    pub max_discount: Option<Decimal>,
    #[validate(range(min = 1))]
    pub usage_limit: Option<i32>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CouponList {
    pub coupons: Vec<CouponView>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Public representation of a coupon row.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CouponView {
    pub id: Uuid,
    pub code: String,
    pub coupon_type: CouponType,
    pub value: Decimal,
    pub min_order_value: Decimal,
    pub max_discount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub usage_count: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub is_active: bool,
}

impl From<coupon::Model> for CouponView {
    fn from(model: coupon::Model) -> Self {
        Self {
            id: model.id,
            code: model.code,
            coupon_type: model.coupon_type,
            value: model.value,
            min_order_value: model.min_order_value,
            max_discount: model.max_discount,
            usage_limit: model.usage_limit,
            usage_count: model.usage_count,
            valid_from: model.valid_from,
            valid_to: model.valid_to,
            is_active: model.is_active,
        }
    }
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub fn policy_for(coupon: &coupon::Model) -> DiscountPolicy {
    match coupon.coupon_type {
        CouponType::Percentage => DiscountPolicy::Percentage {
            percent: coupon.value,
            max_discount: coupon.max_discount,
        },
        CouponType::Flat => DiscountPolicy::Flat {
            amount: coupon.value,
        },
    }
}

fn check_active_window(coupon: &coupon::Model, now: DateTime<Utc>) -> Result<(), CouponError> {
    if !coupon.is_active {
        return Err(CouponError::NotFound);
    }
    if now < coupon.valid_from || now > coupon.valid_to {
        return Err(CouponError::Expired);
    }
    Ok(())
}

fn check_limit(coupon: &coupon::Model) -> Result<(), CouponError> {
    match coupon.usage_limit {
        Some(limit) if coupon.usage_count >= limit => Err(CouponError::LimitReached),
        _ => Ok(()),
    }
}

/// Applies the coupon rules in order: active, window, minimum, usage limit.
pub fn evaluate(
    coupon: &coupon::Model,
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> Result<DiscountPolicy, CouponError> {
    check_active_window(coupon, now)?;
    if subtotal < coupon.min_order_value {
        return Err(CouponError::BelowMinimum {
            minimum: coupon.min_order_value,
        });
    }
    check_limit(coupon)?;
    Ok(policy_for(coupon))
}

#[derive(Clone)]
pub struct CouponService {
    db_pool: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<coupon::Model>, DbErr> {
        CouponEntity::find()
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .one(&*self.db_pool)
            .await
    }

    /// Checks `code` against `subtotal` at `now` without consuming a use.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        subtotal: Decimal,
        now: DateTime<Utc>,
    ) -> Result<CouponApplication, CouponError> {
        let coupon = self.find_by_code(code).await?.ok_or(CouponError::NotFound)?;
        let policy = evaluate(&coupon, subtotal, now)?;
        Ok(CouponApplication {
            coupon_id: coupon.id,
            code: coupon.code,
            policy,
        })
    }

    /// Public preview; there is no subtotal yet so the minimum is not checked.
    #[instrument(skip(self))]
    pub async fn preview(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<CouponView, CouponError> {
        let coupon = self.find_by_code(code).await?.ok_or(CouponError::NotFound)?;
        check_active_window(&coupon, now)?;
        check_limit(&coupon)?;
        Ok(coupon.into())
    }

    /// Consumes one use of `code`. The limit check and the increment are a
    /// single conditional UPDATE so concurrent checkouts cannot overrun it.
    #[instrument(skip(self))]
    pub async fn commit_usage(&self, code: &str) -> Result<(), CouponError> {
        let code = normalize_code(code);
        let result = CouponEntity::update_many()
            .col_expr(
                coupon::Column::UsageCount,
                Expr::col(coupon::Column::UsageCount).add(1),
            )
            .filter(coupon::Column::Code.eq(code.as_str()))
            .filter(
                Condition::any()
                    .add(coupon::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(coupon::Column::UsageCount)
                            .lt(Expr::col(coupon::Column::UsageLimit)),
                    ),
            )
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 1 {
            return Ok(());
        }

        match self.find_by_code(&code).await? {
            Some(_) => Err(CouponError::LimitReached),
            None => Err(CouponError::NotFound),
        }
    }

    /// Hands back a use taken by `commit_usage`. Never drops the count below zero.
    #[instrument(skip(self))]
    pub async fn release_usage(&self, code: &str) -> Result<(), CouponError> {
        let result = CouponEntity::update_many()
            .col_expr(
                coupon::Column::UsageCount,
                Expr::col(coupon::Column::UsageCount).sub(1),
            )
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .filter(coupon::Column::UsageCount.gt(0))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 0 {
            return Err(CouponError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create(
        &self,
        request: CreateCouponRequest,
        created_by: &str,
    ) -> Result<CouponView, ServiceError> {
        request.validate()?;
        if request.value <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Coupon value must be positive".to_string(),
            ));
        }
        if request.coupon_type == CouponType::Percentage && request.value > Decimal::ONE_HUNDRED {
            return Err(ServiceError::ValidationError(
                "Percentage coupons cannot exceed 100".to_string(),
            ));
        }
        if request.valid_from > request.valid_to {
            return Err(ServiceError::ValidationError(
                "valid_from must not be after valid_to".to_string(),
            ));
        }
        if request.min_order_value < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "min_order_value must not be negative".to_string(),
            ));
        }

        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(normalize_code(&request.code)),
            coupon_type: Set(request.coupon_type),
            value: Set(request.value),
            min_order_value: Set(request.min_order_value),
            max_discount: Set(request.max_discount),
            usage_limit: Set(request.usage_limit),
            usage_count: Set(0),
            valid_from: Set(request.valid_from),
            valid_to: Set(request.valid_to),
            is_active: Set(request.is_active),
            created_by: Set(created_by.to_string()),
            created_at: Set(Utc::now()),
        };

        let saved = model.insert(&*self.db_pool).await.map_err(|err| {
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                ServiceError::ValidationError("Coupon code already exists".to_string())
            } else {
                ServiceError::DatabaseError(err)
            }
        })?;

        info!(coupon_id = %saved.id, "coupon created");
        Ok(saved.into())
    }

    pub async fn list(&self, page: u64, per_page: u64) -> Result<CouponList, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        let paginator = CouponEntity::find()
            .order_by_desc(coupon::Column::CreatedAt)
            .paginate(&*self.db_pool, per_page);
        let total = paginator.num_items().await?;
        let coupons = paginator
            .fetch_page(page - 1)
            .await?
            .into_iter()
            .map(CouponView::from)
            .collect();

        Ok(CouponList {
            coupons,
            total,
            page,
            per_page,
        })
    }
}

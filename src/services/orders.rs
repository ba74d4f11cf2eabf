//! Order reads and lifecycle transitions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::activity::ActivityLogger;
use crate::services::payments::{AuthorizationStatus, PaymentGateway};
use crate::services::pricing::OrderLine;

pub const DEFAULT_PAGE_LIMIT: u64 = 50;
pub const MAX_PAGE_LIMIT: u64 = 100;

pub fn clamp_limit(limit: Option<u64>) -> u64 {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: String,
    pub items: Vec<OrderLine>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
    pub currency: String,
    pub coupon_code: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    #[schema(value_type = Object)]
    pub shipping_address: Value,
    #[schema(value_type = Object)]
    pub billing_address: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<order::Model> for OrderView {
    type Error = ServiceError;

    fn try_from(model: order::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            items: serde_json::from_value(model.items)?,
            id: model.id,
            order_number: model.order_number,
            user_id: model.user_id,
            subtotal: model.subtotal,
            discount: model.discount,
            tax: model.tax,
            shipping: model.shipping,
            total: model.total,
            currency: model.currency,
            coupon_code: model.coupon_code,
            status: model.status,
            payment_status: model.payment_status,
            payment_intent_id: model.payment_intent_id,
            shipping_address: model.shipping_address,
            billing_address: model.billing_address,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderList {
    pub orders: Vec<OrderView>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfirmOutcome {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub gateway_status: AuthorizationStatus,
    pub confirmed: bool,
    pub message: String,
}

#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    activity: ActivityLogger,
    events: EventSender,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        activity: ActivityLogger,
        events: EventSender,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            activity,
            events,
        }
    }

    fn not_found(order_id: Uuid) -> ServiceError {
        ServiceError::NotFound(format!("Order {} not found", order_id))
    }

    async fn find(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?)
    }

    async fn find_owned(&self, order_id: Uuid, user_id: &str) -> Result<order::Model, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| Self::not_found(order_id))
    }

    /// Orders of other users are reported as missing.
    pub async fn get_for_user(&self, order_id: Uuid, user_id: &str) -> Result<OrderView, ServiceError> {
        self.find_owned(order_id, user_id).await?.try_into()
    }

    pub async fn get(&self, order_id: Uuid) -> Result<OrderView, ServiceError> {
        self.find(order_id)
            .await?
            .ok_or_else(|| Self::not_found(order_id))?
            .try_into()
    }

    pub async fn list_for_user(
        &self,
        user_id: &str,
        skip: u64,
        limit: u64,
    ) -> Result<OrderList, ServiceError> {
        let query = OrderEntity::find().filter(order::Column::UserId.eq(user_id));
        self.page(query, skip, limit).await
    }

    pub async fn list_all(
        &self,
        status: Option<OrderStatus>,
        skip: u64,
        limit: u64,
    ) -> Result<OrderList, ServiceError> {
        let mut query = OrderEntity::find();
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        self.page(query, skip, limit).await
    }

    async fn page(
        &self,
        query: sea_orm::Select<OrderEntity>,
        skip: u64,
        limit: u64,
    ) -> Result<OrderList, ServiceError> {
        let total = query.clone().count(&*self.db_pool).await?;
        let orders = query
            .order_by_desc(order::Column::CreatedAt)
            .offset(skip)
            .limit(limit)
            .all(&*self.db_pool)
            .await?
            .into_iter()
            .map(OrderView::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(OrderList { orders, total })
    }

    /// Checks the gateway and moves a pending order to confirmed once paid.
    ///
    /// Safe to call repeatedly: the transition is a conditional update on
    /// `status = pending`, and its side effects only run for the call that
    /// performed it.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn confirm(&self, order_id: Uuid, user_id: &str) -> Result<ConfirmOutcome, ServiceError> {
        let order = self.find_owned(order_id, user_id).await?;
        let authorization_id = order.payment_intent_id.clone().ok_or_else(|| {
            ServiceError::InvalidOperation("Order has no payment authorization".to_string())
        })?;

        let gateway_status = self
            .gateway
            .retrieve_status(&authorization_id)
            .await
            .map_err(|e| ServiceError::ExternalServiceError(e.to_string()))?;

        if !gateway_status.is_settled() {
            info!(gateway_status = gateway_status.as_str(), "payment not settled yet");
            return Ok(ConfirmOutcome {
                order_id,
                status: order.status,
                payment_status: order.payment_status,
                gateway_status,
                confirmed: false,
                message: format!("Payment not completed ({})", gateway_status.as_str()),
            });
        }

        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Confirmed))
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Paid))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 1 {
            self.activity.record(
                user_id,
                "confirm",
                "order",
                order_id,
                json!({ "payment_intent_id": authorization_id }),
            );
            self.events.send_or_log(Event::OrderConfirmed(order_id)).await;
            info!("order confirmed");
        }

        let current = self
            .find(order_id)
            .await?
            .ok_or_else(|| Self::not_found(order_id))?;
        let confirmed = current.status != OrderStatus::Pending
            && current.payment_status == PaymentStatus::Paid;
        let message = if confirmed {
            "Order confirmed".to_string()
        } else {
            format!("Order is {}", current.status)
        };

        Ok(ConfirmOutcome {
            order_id,
            status: current.status,
            payment_status: current.payment_status,
            gateway_status,
            confirmed,
            message,
        })
    }

    /// Admin overwrite of an order's status. Any status may be set except out
    /// of a terminal one; setting the current status again changes nothing.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn set_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
        actor: &str,
    ) -> Result<OrderView, ServiceError> {
        let order = self
            .find(order_id)
            .await?
            .ok_or_else(|| Self::not_found(order_id))?;
        let old_status = order.status;

        if old_status == new_status {
            return order.try_into();
        }
        if old_status.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot change status of a {} order",
                old_status
            )));
        }

        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(old_status))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 0 {
            warn!(%old_status, "order status changed concurrently");
            return Err(ServiceError::Conflict(
                "Order status changed concurrently, retry".to_string(),
            ));
        }

        self.activity.record(
            actor,
            "update_status",
            "order",
            order_id,
            json!({ "status": new_status, "previous_status": old_status }),
        );
        self.events
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;
        info!(%old_status, "order status updated");

        self.get(order_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_default_and_cap() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(500)), 100);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(20)), 20);
    }
}

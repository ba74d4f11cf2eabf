use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::handlers::common::{parse_order_status, PageQuery};
use crate::services::orders::{ConfirmOutcome, OrderList, OrderView};
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, IntoParams)]
pub struct AdminOrderQuery {
    /// Filter by status
    pub status: Option<String>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct StatusQuery {
    /// New status
    pub status: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List my orders",
    description = "Orders of the caller, newest first",
    params(PageQuery),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<OrderList>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(page): Query<PageQuery>,
) -> ApiResult<OrderList> {
    let orders = state
        .services
        .orders
        .list_for_user(&auth_user.user_id, page.skip(), page.limit())
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderView> {
    let order = state
        .services
        .orders
        .get_for_user(id, &auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/confirm",
    summary = "Confirm order payment",
    description = "Checks the payment authorization with the gateway and confirms the order once it has settled. Safe to call repeatedly.",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Current confirmation state", body = ApiResponse<ConfirmOutcome>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway unavailable", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn confirm_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<ConfirmOutcome> {
    let outcome = state
        .services
        .orders
        .confirm(id, &auth_user.user_id)
        .await?;
    let message = outcome.message.clone();
    let mut response = ApiResponse::success(outcome);
    response.message = Some(message);
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders",
    summary = "List all orders",
    params(AdminOrderQuery),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<OrderList>),
        (status = 400, description = "Unknown status filter", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn list_all_orders(
    State(state): State<AppState>,
    Query(query): Query<AdminOrderQuery>,
) -> ApiResult<OrderList> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(parse_order_status)
        .transpose()?;
    let page = PageQuery {
        skip: query.skip,
        limit: query.limit,
    };
    let orders = state
        .services
        .orders
        .list_all(status, page.skip(), page.limit())
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{id}/status",
    summary = "Set order status",
    description = "Overwrites the status of a non-terminal order",
    params(("id" = Uuid, Path, description = "Order ID"), StatusQuery),
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderView>),
        (status = 400, description = "Unknown status or terminal order", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent status change", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<ApiResponse<OrderView>>, ServiceError> {
    let status = parse_order_status(&query.status)?;
    let order = state
        .services
        .orders
        .set_status(id, status, &auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

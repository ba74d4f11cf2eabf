use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::services::carts::{AddItemRequest, CartView};
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, IntoParams)]
pub struct QuantityQuery {
    /// New quantity; zero or less removes the line
    pub quantity: i32,
}

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    summary = "Get my cart",
    responses(
        (status = 200, description = "Cart with a price preview", body = ApiResponse<CartView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn get_cart(State(state): State<AppState>, auth_user: AuthUser) -> ApiResult<CartView> {
    let cart = state.services.carts.view(&auth_user.user_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    summary = "Add to cart",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 404, description = "Variant not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<AddItemRequest>,
) -> ApiResult<CartView> {
    let cart = state
        .services
        .carts
        .add_item(&auth_user.user_id, request)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{variant_id}",
    summary = "Set cart line quantity",
    params(("variant_id" = Uuid, Path, description = "Variant ID"), QuantityQuery),
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 404, description = "Cart or line not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(variant_id): Path<Uuid>,
    Query(query): Query<QuantityQuery>,
) -> ApiResult<CartView> {
    let cart = state
        .services
        .carts
        .update_item(&auth_user.user_id, variant_id, query.quantity)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{variant_id}",
    summary = "Remove cart line",
    params(("variant_id" = Uuid, Path, description = "Variant ID")),
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 404, description = "Cart or line not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(variant_id): Path<Uuid>,
) -> ApiResult<CartView> {
    let cart = state
        .services
        .carts
        .remove_item(&auth_user.user_id, variant_id)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

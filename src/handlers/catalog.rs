use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::handlers::common::created;
use crate::services::catalog::{CreateVariantRequest, RestockRequest, VariantView};
use crate::{ApiResponse, ApiResult, AppState};

#[utoipa::path(
    get,
    path = "/api/v1/variants/{id}",
    summary = "Get variant",
    params(("id" = Uuid, Path, description = "Variant ID")),
    responses(
        (status = 200, description = "Variant", body = ApiResponse<VariantView>),
        (status = 404, description = "Variant not found", body = crate::errors::ErrorResponse),
    ),
    tag = "catalog"
)]
pub async fn get_variant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<VariantView> {
    let variant = state.services.catalog.get_variant(id).await?;
    Ok(Json(ApiResponse::success(variant)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/variants",
    summary = "Create variant",
    request_body = CreateVariantRequest,
    responses(
        (status = 201, description = "Variant created", body = ApiResponse<VariantView>),
        (status = 400, description = "Invalid variant or duplicate SKU", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn create_variant(
    State(state): State<AppState>,
    auth_user: crate::auth::AuthUser,
    Json(request): Json<CreateVariantRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let variant = state.services.catalog.create_variant(request).await?;
    state.services.activity.record(
        &auth_user.user_id,
        "create",
        "variant",
        variant.id,
        serde_json::json!({ "sku": variant.sku }),
    );
    Ok(created(variant))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/variants/{id}/restock",
    summary = "Restock variant",
    params(("id" = Uuid, Path, description = "Variant ID")),
    request_body = RestockRequest,
    responses(
        (status = 200, description = "Updated variant", body = ApiResponse<VariantView>),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Variant not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn restock_variant(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<RestockRequest>,
) -> ApiResult<VariantView> {
    request.validate()?;
    let variant = state.services.catalog.restock(id, request.quantity).await?;
    Ok(Json(ApiResponse::success(variant)))
}

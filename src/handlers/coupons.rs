use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::handlers::common::created;
use crate::services::coupons::{CouponList, CouponView, CreateCouponRequest};
use crate::{ApiResponse, ApiResult, AppState, PaginationQuery};

#[utoipa::path(
    get,
    path = "/api/v1/coupons/validate/{code}",
    summary = "Validate coupon",
    description = "Public preview of a coupon code. The minimum order value is not checked here.",
    params(("code" = String, Path, description = "Coupon code")),
    responses(
        (status = 200, description = "Coupon is usable", body = ApiResponse<CouponView>),
        (status = 400, description = "Coupon expired or exhausted", body = crate::errors::ErrorResponse),
        (status = 404, description = "Invalid coupon", body = crate::errors::ErrorResponse),
    ),
    tag = "coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<CouponView> {
    let coupon = state.services.coupons.preview(&code, Utc::now()).await?;
    Ok(Json(ApiResponse::success(coupon)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/coupons",
    summary = "Create coupon",
    request_body = CreateCouponRequest,
    responses(
        (status = 201, description = "Coupon created", body = ApiResponse<CouponView>),
        (status = 400, description = "Invalid coupon or duplicate code", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateCouponRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let coupon = state
        .services
        .coupons
        .create(request, &auth_user.user_id)
        .await?;
    state.services.activity.record(
        &auth_user.user_id,
        "create",
        "coupon",
        coupon.id,
        serde_json::json!({ "code": coupon.code }),
    );
    Ok(created(coupon))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/coupons",
    summary = "List coupons",
    params(PaginationQuery),
    responses(
        (status = 200, description = "Coupons", body = ApiResponse<CouponList>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn list_coupons(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<CouponList> {
    let coupons = state
        .services
        .coupons
        .list(query.page, query.per_page)
        .await?;
    Ok(Json(ApiResponse::success(coupons)))
}

use axum::{extract::State, response::IntoResponse, Json};

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::handlers::common::created;
use crate::services::checkout::{CheckoutReceipt, CheckoutRequest, Customer};
use crate::{ApiResponse, AppState};

/// Place an order from the caller's cart.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    summary = "Checkout",
    description = "Reserves stock for every cart line, prices the order (applying the coupon when it validates), creates a payment authorization and persists a pending order. The cart is cleared on success.",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<CheckoutReceipt>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Empty cart, unknown variant, bad address or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 500, description = "Payment setup or persistence failure", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let customer = Customer {
        user_id: auth_user.user_id,
        email: auth_user.email,
    };
    let receipt = state
        .services
        .checkout
        .checkout(&customer, request)
        .await?;
    Ok(created(receipt))
}

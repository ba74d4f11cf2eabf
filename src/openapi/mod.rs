use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
# Storefront API

Carts, catalog, coupons and the checkout/order lifecycle.

## Authentication

Customer and admin endpoints take a JWT bearer token:

```
Authorization: Bearer <your-jwt-token>
```

Admin endpoints additionally need the `admin` role.

## Checkout flow

1. Fill the cart (`POST /cart/items`).
2. `POST /checkout` reserves stock, prices the order and returns a payment `client_secret`.
3. Complete the payment client-side, then poll `POST /orders/{id}/confirm`.

## Errors

Failures use one body shape with the HTTP status category, a message and the request id:

```json
{
  "error": "Bad Request",
  "message": "Validation error: Cart is empty",
  "request_id": "3f1c...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    modifiers(&SecurityAddon),
    tags(
        (name = "checkout", description = "Order placement"),
        (name = "orders", description = "Customer order reads and confirmation"),
        (name = "cart", description = "Per-user cart"),
        (name = "catalog", description = "Variant reads"),
        (name = "coupons", description = "Coupon preview"),
        (name = "admin", description = "Administrative endpoints")
    ),
    paths(
        crate::handlers::checkout::checkout,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::confirm_order,
        crate::handlers::orders::list_all_orders,
        crate::handlers::orders::update_order_status,
        crate::handlers::cart::get_cart,
        crate::handlers::cart::add_item,
        crate::handlers::cart::update_item,
        crate::handlers::cart::remove_item,
        crate::handlers::catalog::get_variant,
        crate::handlers::catalog::create_variant,
        crate::handlers::catalog::restock_variant,
        crate::handlers::coupons::validate_coupon,
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::list_coupons,
        crate::handlers::admin::list_activity,
        crate::handlers::admin::list_stale_holds,
    ),
    components(
        schemas(
            crate::entities::OrderStatus,
            crate::entities::PaymentStatus,
            crate::entities::CouponType,
            crate::services::pricing::DiscountPolicy,
            crate::services::payments::AuthorizationStatus,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_checkout_paths() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string(&openapi).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/v1/checkout"));
        assert!(json.contains("/api/v1/orders/{id}/confirm"));
        assert!(json.contains("Bearer"));
    }
}

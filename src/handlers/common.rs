use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;

use crate::entities::OrderStatus;
use crate::errors::ServiceError;
use crate::services::orders::clamp_limit;
use crate::ApiResponse;

/// `skip`/`limit` paging used by list endpoints.
#[derive(Debug, Default, Deserialize, Serialize, IntoParams)]
pub struct PageQuery {
    /// Rows to skip (default 0)
    pub skip: Option<u64>,
    /// Page size (default 50, max 100)
    pub limit: Option<u64>,
}

impl PageQuery {
    pub fn skip(&self) -> u64 {
        self.skip.unwrap_or(0)
    }

    pub fn limit(&self) -> u64 {
        clamp_limit(self.limit)
    }
}

/// 201 with the standard envelope.
pub fn created<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

pub fn parse_order_status(status: &str) -> Result<OrderStatus, ServiceError> {
    match status.trim().to_ascii_lowercase().as_str() {
        "pending" => Ok(OrderStatus::Pending),
        "confirmed" => Ok(OrderStatus::Confirmed),
        "processing" => Ok(OrderStatus::Processing),
        "shipped" => Ok(OrderStatus::Shipped),
        "delivered" => Ok(OrderStatus::Delivered),
        "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
        "refunded" => Ok(OrderStatus::Refunded),
        other => Err(ServiceError::InvalidStatus(format!(
            "Unknown order status: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_aliases() {
        assert_eq!(parse_order_status("Canceled").unwrap(), OrderStatus::Cancelled);
        assert_eq!(parse_order_status(" shipped ").unwrap(), OrderStatus::Shipped);
        assert!(matches!(
            parse_order_status("lost"),
            Err(ServiceError::InvalidStatus(_))
        ));
    }

    #[test]
    fn page_defaults() {
        let page = PageQuery::default();
        assert_eq!(page.skip(), 0);
        assert_eq!(page.limit(), 50);
    }
}

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::activity::{ActivityFilter, ActivityList};
use crate::services::orders::clamp_limit;
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, IntoParams)]
pub struct ActivityQuery {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub user_id: Option<String>,
    pub action_type: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct StaleHoldQuery {
    /// Holds older than this many minutes (default 30)
    pub older_than_minutes: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StaleHold {
    pub id: Uuid,
    pub checkout_id: Uuid,
    pub variant_id: Uuid,
    pub quantity: i32,
    pub created_at: chrono::DateTime<Utc>,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/activity-logs",
    summary = "List activity logs",
    params(ActivityQuery),
    responses(
        (status = 200, description = "Activity, newest first", body = ApiResponse<ActivityList>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn list_activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<ActivityList> {
    let filter = ActivityFilter {
        user_id: query.user_id,
        action_type: query.action_type,
    };
    let logs = state
        .services
        .activity
        .list(filter, query.skip.unwrap_or(0), clamp_limit(query.limit))
        .await?;
    Ok(Json(ApiResponse::success(logs)))
}

/// Inventory holds still open past the cutoff, for reconciliation.
#[utoipa::path(
    get,
    path = "/api/v1/admin/inventory/stale-holds",
    summary = "List stale inventory holds",
    params(StaleHoldQuery),
    responses(
        (status = 200, description = "Holds not committed or released", body = ApiResponse<Vec<StaleHold>>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn list_stale_holds(
    State(state): State<AppState>,
    Query(query): Query<StaleHoldQuery>,
) -> ApiResult<Vec<StaleHold>> {
    let minutes = query.older_than_minutes.unwrap_or(30);
    if minutes < 0 {
        return Err(ServiceError::ValidationError(
            "older_than_minutes must not be negative".to_string(),
        ));
    }
    let cutoff = Utc::now() - Duration::minutes(minutes);
    let holds = state
        .services
        .ledger
        .stale_holds(cutoff)
        .await?
        .into_iter()
        .map(|hold| StaleHold {
            id: hold.id,
            checkout_id: hold.checkout_id,
            variant_id: hold.variant_id,
            quantity: hold.quantity,
            created_at: hold.created_at,
        })
        .collect();
    Ok(Json(ApiResponse::success(holds)))
}

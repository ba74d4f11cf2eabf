//! Audit trail of user and admin actions.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::activity_log::{self, Entity as ActivityLogEntity};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActivityView {
    pub id: Uuid,
    pub user_id: String,
    pub action_type: String,
    pub resource_type: String,
    pub resource_id: String,
    #[schema(value_type = Object)]
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

impl From<activity_log::Model> for ActivityView {
    fn from(model: activity_log::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            action_type: model.action_type,
            resource_type: model.resource_type,
            resource_id: model.resource_id,
            metadata: model.metadata,
            timestamp: model.timestamp,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityFilter {
    pub user_id: Option<String>,
    pub action_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActivityList {
    pub logs: Vec<ActivityView>,
    pub total: u64,
}

/// Fire-and-forget activity recorder. A failed write is logged and dropped.
#[derive(Clone)]
pub struct ActivityLogger {
    db_pool: Arc<DatabaseConnection>,
}

impl ActivityLogger {
    pub fn new(db_pool: Arc<DatabaseConnection>) -> Self {
        Self { db_pool }
    }

    /// Writes the entry on a background task. The handle is only useful to
    /// callers that need to wait for the write, such as tests.
    pub fn record(
        &self,
        actor: &str,
        action_type: &str,
        resource_type: &str,
        resource_id: impl ToString,
        metadata: Value,
    ) -> JoinHandle<()> {
        let db = self.db_pool.clone();
        let entry = activity_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(actor.to_string()),
            action_type: Set(action_type.to_string()),
            resource_type: Set(resource_type.to_string()),
            resource_id: Set(resource_id.to_string()),
            metadata: Set(metadata),
            timestamp: Set(Utc::now()),
        };

        tokio::spawn(async move {
            if let Err(e) = entry.insert(&*db).await {
                warn!(error = %e, "failed to record activity");
            }
        })
    }

    pub async fn list(
        &self,
        filter: ActivityFilter,
        skip: u64,
        limit: u64,
    ) -> Result<ActivityList, ServiceError> {
        let mut query = ActivityLogEntity::find();
        if let Some(user_id) = filter.user_id {
            query = query.filter(activity_log::Column::UserId.eq(user_id));
        }
        if let Some(action_type) = filter.action_type {
            query = query.filter(activity_log::Column::ActionType.eq(action_type));
        }

        let total = query.clone().count(&*self.db_pool).await?;
        let logs = query
            .order_by_desc(activity_log::Column::Timestamp)
            .offset(skip)
            .limit(limit)
            .all(&*self.db_pool)
            .await?
            .into_iter()
            .map(ActivityView::from)
            .collect();

        Ok(ActivityList { logs, total })
    }
}

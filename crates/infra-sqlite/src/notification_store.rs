// SQLite NotificationStore Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use fakturace_core::domain::NotificationPayload;
use fakturace_core::error::Result;
use fakturace_core::port::{NotificationStore, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

pub struct SqliteNotificationStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteNotificationStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl NotificationStore for SqliteNotificationStore {
    async fn create(&self, payload: &NotificationPayload) -> Result<i64> {
        let metadata = payload
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO notifications (type, level, message, metadata, user_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(payload.kind.as_str())
        .bind(payload.level.as_str())
        .bind(&payload.message)
        .bind(metadata)
        .bind(payload.user_id)
        .bind(self.time_provider.now_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(notification_id = id, kind = payload.kind.as_str(), "Notification stored");
        Ok(id)
    }
}

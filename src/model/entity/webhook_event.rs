use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::prelude::FromRow;

use crate::model::repo::ResourceTyped;
use crate::model::{ModelManager, error::DatabaseResult};

/// Stripe event ids already handled.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct WebhookEvent {
    id: String,
    event_type: String,
    received_at: DateTime<Utc>,
}

impl ResourceTyped for WebhookEvent {
    fn get_resource_type() -> crate::model::ResourceType {
        crate::model::ResourceType::WebhookEvent
    }
}

impl WebhookEvent {
    /// `false` when the event id was seen before.
    pub async fn record(mm: &ModelManager, id: &str, event_type: &str) -> DatabaseResult<bool> {
        let result = sqlx::query(
            "INSERT INTO webhook_events (id, event_type) VALUES ($1,$2) ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(event_type)
        .execute(mm.executor())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Drops the marker of an event whose processing failed, so a redelivery is handled again.
    pub async fn forget(mm: &ModelManager, id: &str) -> DatabaseResult<()> {
        sqlx::query("DELETE FROM webhook_events WHERE id = $1")
            .bind(id)
            .execute(mm.executor())
            .await?;
        Ok(())
    }
}

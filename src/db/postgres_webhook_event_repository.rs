use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::models::webhook_event::{WebhookEventRecord, WebhookSource};

use super::webhook_event_repository::WebhookEventRepository;

pub struct PostgresWebhookEventRepository {
    pub pool: PgPool,
}

#[async_trait]
impl WebhookEventRepository for PostgresWebhookEventRepository {
    async fn record_if_new(
        &self,
        event_id: &str,
        source: WebhookSource,
        event_type: &str,
        payload: &Value,
    ) -> Result<bool, sqlx::Error> {
        let res = sqlx::query(
            r#"
            INSERT INTO webhook_events (event_id, source, event_type, payload, received_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(source.as_str())
        .bind(event_type)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn mark_dispatched(&self, event_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET dispatched_at = now(), dispatch_error = NULL
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_dispatch_failed(&self, event_id: &str, reason: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET dispatch_error = $2
            WHERE event_id = $1 AND dispatched_at IS NULL
            "#,
        )
        .bind(event_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_event(&self, event_id: &str) -> Result<Option<WebhookEventRecord>, sqlx::Error> {
        sqlx::query_as::<_, WebhookEventRecord>(
            r#"
            SELECT event_id, source, event_type, payload, received_at, dispatched_at, dispatch_error
            FROM webhook_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_failed_events(
        &self,
        limit: i64,
    ) -> Result<Vec<WebhookEventRecord>, sqlx::Error> {
        sqlx::query_as::<_, WebhookEventRecord>(
            r#"
            SELECT event_id, source, event_type, payload, received_at, dispatched_at, dispatch_error
            FROM webhook_events
            WHERE dispatched_at IS NULL AND dispatch_error IS NOT NULL
            ORDER BY received_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn purge_events_older_than(&self, days: i32) -> Result<u64, sqlx::Error> {
        let res = sqlx::query(
            r#"
            DELETE FROM webhook_events
            WHERE received_at < now() - ($1::int * INTERVAL '1 day')
              AND NOT (dispatched_at IS NULL AND dispatch_error IS NOT NULL)
            "#,
        )
        .bind(days)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}

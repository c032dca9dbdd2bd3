use async_trait::async_trait;
use serde_json::Value;

use crate::models::webhook_event::{WebhookEventRecord, WebhookSource};

#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Inserts the event unless its id is already known. `Ok(true)` means this call recorded
    /// it and owns dispatch; `Ok(false)` is a redelivery.
    ///
    /// `event_id` is the only key: ids share one namespace across billing and job-runner
    /// sources, so a runner event reusing a billing event id is treated as a duplicate.
    async fn record_if_new(
        &self,
        event_id: &str,
        source: WebhookSource,
        event_type: &str,
        payload: &Value,
    ) -> Result<bool, sqlx::Error>;

    async fn mark_dispatched(&self, event_id: &str) -> Result<(), sqlx::Error>;

    async fn mark_dispatch_failed(&self, event_id: &str, reason: &str) -> Result<(), sqlx::Error>;

    async fn find_event(&self, event_id: &str) -> Result<Option<WebhookEventRecord>, sqlx::Error>;

    async fn list_failed_events(&self, limit: i64)
        -> Result<Vec<WebhookEventRecord>, sqlx::Error>;

    /// Deletes events received more than `days` ago, except failed dispatches still
    /// awaiting replay.
    async fn purge_events_older_than(&self, days: i32) -> Result<u64, sqlx::Error>;
}

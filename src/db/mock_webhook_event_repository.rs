use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

use super::webhook_event_repository::WebhookEventRepository;
use crate::models::webhook_event::{WebhookEventRecord, WebhookSource};

#[derive(Clone, Default)]
pub struct MockWebhookEventRepository {
    events: Arc<Mutex<HashMap<String, WebhookEventRecord>>>,
    pub records: Arc<Mutex<usize>>,
    pub fail_writes: Arc<Mutex<bool>>,
}

impl MockWebhookEventRepository {
    pub fn event(&self, event_id: &str) -> Option<WebhookEventRecord> {
        self.events.lock().unwrap().get(event_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn backdate(&self, event_id: &str, received_at: OffsetDateTime) {
        if let Some(record) = self.events.lock().unwrap().get_mut(event_id) {
            record.received_at = received_at;
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }

    fn check_writable(&self) -> Result<(), sqlx::Error> {
        if *self.fail_writes.lock().unwrap() {
            return Err(sqlx::Error::Protocol("Mock DB failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookEventRepository for MockWebhookEventRepository {
    async fn record_if_new(
        &self,
        event_id: &str,
        source: WebhookSource,
        event_type: &str,
        payload: &Value,
    ) -> Result<bool, sqlx::Error> {
        self.check_writable()?;
        *self.records.lock().unwrap() += 1;
        let mut events = self.events.lock().unwrap();
        if events.contains_key(event_id) {
            return Ok(false);
        }
        events.insert(
            event_id.to_string(),
            WebhookEventRecord {
                event_id: event_id.to_string(),
                source: source.as_str().to_string(),
                event_type: event_type.to_string(),
                payload: payload.clone(),
                received_at: OffsetDateTime::now_utc(),
                dispatched_at: None,
                dispatch_error: None,
            },
        );
        Ok(true)
    }

    async fn mark_dispatched(&self, event_id: &str) -> Result<(), sqlx::Error> {
        self.check_writable()?;
        if let Some(record) = self.events.lock().unwrap().get_mut(event_id) {
            record.dispatched_at = Some(OffsetDateTime::now_utc());
            record.dispatch_error = None;
        }
        Ok(())
    }

    async fn mark_dispatch_failed(&self, event_id: &str, reason: &str) -> Result<(), sqlx::Error> {
        self.check_writable()?;
        if let Some(record) = self.events.lock().unwrap().get_mut(event_id) {
            if record.dispatched_at.is_none() {
                record.dispatch_error = Some(reason.to_string());
            }
        }
        Ok(())
    }

    async fn find_event(&self, event_id: &str) -> Result<Option<WebhookEventRecord>, sqlx::Error> {
        Ok(self.event(event_id))
    }

    async fn list_failed_events(
        &self,
        limit: i64,
    ) -> Result<Vec<WebhookEventRecord>, sqlx::Error> {
        let mut failed: Vec<WebhookEventRecord> = self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.dispatched_at.is_none() && r.dispatch_error.is_some())
            .cloned()
            .collect();
        failed.sort_by_key(|r| r.received_at);
        failed.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(failed)
    }

    async fn purge_events_older_than(&self, days: i32) -> Result<u64, sqlx::Error> {
        self.check_writable()?;
        let cutoff = OffsetDateTime::now_utc() - time::Duration::days(i64::from(days));
        let mut events = self.events.lock().unwrap();
        let before = events.len();
        events.retain(|_, r| {
            r.received_at >= cutoff || (r.dispatched_at.is_none() && r.dispatch_error.is_some())
        });
        Ok((before - events.len()) as u64)
    }
}

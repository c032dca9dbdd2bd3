use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

use crate::models::organization::BillingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookSource {
    /// Subscription lifecycle events from the billing provider.
    Billing,
    /// Job lifecycle events from the external worker platform.
    JobRunner,
}

impl WebhookSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookSource::Billing => "billing",
            WebhookSource::JobRunner => "job_runner",
        }
    }

    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "billing" => Some(WebhookSource::Billing),
            "job_runner" => Some(WebhookSource::JobRunner),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookEventRecord {
    pub event_id: String,
    pub source: String,
    pub event_type: String,
    pub payload: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub dispatched_at: Option<OffsetDateTime>,
    pub dispatch_error: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedEvent {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Identity of an event, the minimum needed to deduplicate it before any typed parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_type: String,
}

impl EventEnvelope {
    pub fn from_payload(source: WebhookSource, payload: &Value) -> Result<Self, MalformedEvent> {
        let (id_key, type_key) = match source {
            WebhookSource::Billing => ("id", "type"),
            WebhookSource::JobRunner => ("eventId", "eventType"),
        };
        let event_id = non_empty_str(payload, &[id_key], id_key)?;
        let event_type = non_empty_str(payload, &[type_key], type_key)?;
        Ok(Self {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded { result_count: Option<i64> },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobCompletion {
    pub job_id: Uuid,
    pub external_run_id: Option<String>,
    pub outcome: JobOutcome,
    pub occurred_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionChange {
    pub organization_id: Option<Uuid>,
    pub customer_id: Option<String>,
    pub subscription_id: String,
    pub status: BillingStatus,
    pub plan_code: Option<String>,
    pub current_period_end: Option<OffsetDateTime>,
    pub canceled_at: Option<OffsetDateTime>,
    pub event_at: OffsetDateTime,
}

/// A deduplicated webhook event, typed by what it means for the domain.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    JobCompleted(JobCompletion),
    SubscriptionChanged(SubscriptionChange),
    Unknown { event_type: String, payload: Value },
}

impl WebhookEvent {
    pub fn parse(source: WebhookSource, payload: &Value) -> Result<Self, MalformedEvent> {
        let envelope = EventEnvelope::from_payload(source, payload)?;
        match source {
            WebhookSource::JobRunner => parse_job_runner_event(envelope, payload),
            WebhookSource::Billing => parse_billing_event(envelope, payload),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::JobCompleted(_) => "job_completed",
            WebhookEvent::SubscriptionChanged(_) => "subscription_changed",
            WebhookEvent::Unknown { .. } => "unknown",
        }
    }
}

fn parse_job_runner_event(
    envelope: EventEnvelope,
    payload: &Value,
) -> Result<WebhookEvent, MalformedEvent> {
    let outcome_kind = match envelope.event_type.to_ascii_lowercase().as_str() {
        "job.succeeded" => Some(true),
        "job.failed" | "job.aborted" | "job.timed_out" => Some(false),
        _ => None,
    };
    let Some(succeeded) = outcome_kind else {
        return Ok(WebhookEvent::Unknown {
            event_type: envelope.event_type,
            payload: payload.clone(),
        });
    };

    let raw_job_id = non_empty_str(payload, &["data", "jobId"], "data.jobId")?;
    let job_id = Uuid::parse_str(raw_job_id).map_err(|err| MalformedEvent::InvalidField {
        field: "data.jobId",
        reason: err.to_string(),
    })?;
    let occurred_at = match jget(payload, &["createdAt"]).and_then(Value::as_str) {
        Some(raw) => {
            OffsetDateTime::parse(raw, &Rfc3339).map_err(|err| MalformedEvent::InvalidField {
                field: "createdAt",
                reason: err.to_string(),
            })?
        }
        None => return Err(MalformedEvent::MissingField("createdAt")),
    };
    let external_run_id = jget(payload, &["data", "runId"])
        .and_then(Value::as_str)
        .map(str::to_string);

    let outcome = if succeeded {
        JobOutcome::Succeeded {
            result_count: jget(payload, &["data", "resultCount"]).and_then(Value::as_i64),
        }
    } else {
        let reason = jget(payload, &["data", "error"])
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| envelope.event_type.clone());
        JobOutcome::Failed { reason }
    };

    Ok(WebhookEvent::JobCompleted(JobCompletion {
        job_id,
        external_run_id,
        outcome,
        occurred_at,
    }))
}

fn parse_billing_event(
    envelope: EventEnvelope,
    payload: &Value,
) -> Result<WebhookEvent, MalformedEvent> {
    match envelope.event_type.as_str() {
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => {}
        _ => {
            return Ok(WebhookEvent::Unknown {
                event_type: envelope.event_type,
                payload: payload.clone(),
            })
        }
    }

    let object = jget(payload, &["data", "object"]).ok_or(MalformedEvent::MissingField("data.object"))?;
    let subscription_id = non_empty_str(object, &["id"], "data.object.id")?.to_string();

    let raw_status = non_empty_str(object, &["status"], "data.object.status")?;
    let status =
        BillingStatus::from_provider(raw_status).ok_or_else(|| MalformedEvent::InvalidField {
            field: "data.object.status",
            reason: format!("unsupported subscription status `{raw_status}`"),
        })?;

    let created = jget(payload, &["created"])
        .and_then(Value::as_i64)
        .ok_or(MalformedEvent::MissingField("created"))?;
    let event_at = unix_timestamp(created, "created")?;

    // Newer API versions moved the period end onto the subscription item.
    let current_period_end = match jget(object, &["current_period_end"])
        .and_then(Value::as_i64)
        .or_else(|| first_item(object).and_then(|item| item.get("current_period_end")?.as_i64()))
    {
        Some(ts) => Some(unix_timestamp(ts, "data.object.current_period_end")?),
        None => None,
    };
    let canceled_at = match jget(object, &["canceled_at"]).and_then(Value::as_i64) {
        Some(ts) => Some(unix_timestamp(ts, "data.object.canceled_at")?),
        None => None,
    };

    let organization_id = match jget(object, &["metadata", "organization_id"]).and_then(Value::as_str) {
        Some(raw) => Some(Uuid::parse_str(raw).map_err(|err| MalformedEvent::InvalidField {
            field: "data.object.metadata.organization_id",
            reason: err.to_string(),
        })?),
        None => None,
    };
    let customer_id = jget(object, &["customer"])
        .and_then(Value::as_str)
        .map(str::to_string);
    let plan_code = jget(object, &["metadata", "plan_code"])
        .and_then(Value::as_str)
        .or_else(|| {
            let price = first_item(object)?.get("price")?;
            price
                .get("lookup_key")
                .and_then(Value::as_str)
                .or_else(|| jget(price, &["metadata", "plan_code"]).and_then(Value::as_str))
        })
        .map(|code| code.trim().to_ascii_lowercase())
        .filter(|code| !code.is_empty());

    Ok(WebhookEvent::SubscriptionChanged(SubscriptionChange {
        organization_id,
        customer_id,
        subscription_id,
        status,
        plan_code,
        current_period_end,
        canceled_at,
        event_at,
    }))
}

fn jget<'a>(val: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = val;
    for key in path {
        cur = cur.get(*key)?;
    }
    Some(cur)
}

fn non_empty_str<'a>(
    val: &'a Value,
    path: &[&str],
    field: &'static str,
) -> Result<&'a str, MalformedEvent> {
    jget(val, path)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(MalformedEvent::MissingField(field))
}

fn first_item(subscription: &Value) -> Option<&Value> {
    jget(subscription, &["items", "data"])?.as_array()?.first()
}

fn unix_timestamp(ts: i64, field: &'static str) -> Result<OffsetDateTime, MalformedEvent> {
    OffsetDateTime::from_unix_timestamp(ts).map_err(|err| MalformedEvent::InvalidField {
        field,
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn envelope_uses_source_specific_keys() {
        let billing = json!({"id": "evt_1", "type": "invoice.paid"});
        let runner = json!({"eventId": "run-evt-1", "eventType": "job.succeeded"});

        assert_eq!(
            EventEnvelope::from_payload(WebhookSource::Billing, &billing).unwrap(),
            EventEnvelope {
                event_id: "evt_1".into(),
                event_type: "invoice.paid".into()
            }
        );
        assert_eq!(
            EventEnvelope::from_payload(WebhookSource::JobRunner, &runner)
                .unwrap()
                .event_id,
            "run-evt-1"
        );
        assert_eq!(
            EventEnvelope::from_payload(WebhookSource::JobRunner, &billing),
            Err(MalformedEvent::MissingField("eventId"))
        );
    }

    #[test]
    fn parses_job_failure() {
        let job_id = Uuid::new_v4();
        let payload = json!({
            "eventId": "e-1",
            "eventType": "job.failed",
            "createdAt": "2025-02-03T04:05:06Z",
            "data": {"jobId": job_id.to_string(), "runId": "run_9", "error": "proxy blocked"}
        });

        let event = WebhookEvent::parse(WebhookSource::JobRunner, &payload).unwrap();
        assert_eq!(
            event,
            WebhookEvent::JobCompleted(JobCompletion {
                job_id,
                external_run_id: Some("run_9".into()),
                outcome: JobOutcome::Failed {
                    reason: "proxy blocked".into()
                },
                occurred_at: datetime!(2025-02-03 04:05:06 UTC),
            })
        );
    }

    #[test]
    fn job_event_with_bad_job_id_is_malformed() {
        let payload = json!({
            "eventId": "e-2",
            "eventType": "job.succeeded",
            "createdAt": "2025-02-03T04:05:06Z",
            "data": {"jobId": "not-a-uuid"}
        });
        assert!(matches!(
            WebhookEvent::parse(WebhookSource::JobRunner, &payload),
            Err(MalformedEvent::InvalidField {
                field: "data.jobId",
                ..
            })
        ));
    }

    #[test]
    fn unrecognised_types_become_unknown() {
        let payload = json!({"eventId": "e-3", "eventType": "job.heartbeat"});
        let event = WebhookEvent::parse(WebhookSource::JobRunner, &payload).unwrap();
        assert_eq!(event.kind(), "unknown");

        let payload = json!({"id": "evt_9", "type": "invoice.paid", "data": {}});
        let event = WebhookEvent::parse(WebhookSource::Billing, &payload).unwrap();
        assert!(matches!(event, WebhookEvent::Unknown { ref event_type, .. } if event_type == "invoice.paid"));
    }

    #[test]
    fn parses_subscription_update_with_item_level_period() {
        let org_id = Uuid::new_v4();
        let payload = json!({
            "id": "evt_sub",
            "type": "customer.subscription.updated",
            "created": 1_735_689_600,
            "data": {"object": {
                "id": "sub_123",
                "customer": "cus_42",
                "status": "active",
                "canceled_at": null,
                "metadata": {"organization_id": org_id.to_string()},
                "items": {"data": [{
                    "current_period_end": 1_738_368_000,
                    "price": {"lookup_key": "Pro"}
                }]}
            }}
        });

        let WebhookEvent::SubscriptionChanged(change) =
            WebhookEvent::parse(WebhookSource::Billing, &payload).unwrap()
        else {
            panic!("expected subscription change");
        };
        assert_eq!(change.organization_id, Some(org_id));
        assert_eq!(change.customer_id.as_deref(), Some("cus_42"));
        assert_eq!(change.subscription_id, "sub_123");
        assert_eq!(change.status, BillingStatus::Active);
        assert_eq!(change.plan_code.as_deref(), Some("pro"));
        assert_eq!(
            change.current_period_end,
            Some(datetime!(2025-02-01 0:00 UTC))
        );
        assert_eq!(change.canceled_at, None);
        assert_eq!(change.event_at, datetime!(2025-01-01 0:00 UTC));
    }

    #[test]
    fn subscription_with_unsupported_status_is_malformed() {
        let payload = json!({
            "id": "evt_x",
            "type": "customer.subscription.updated",
            "created": 1_735_689_600,
            "data": {"object": {"id": "sub_1", "status": "paused"}}
        });
        assert!(matches!(
            WebhookEvent::parse(WebhookSource::Billing, &payload),
            Err(MalformedEvent::InvalidField {
                field: "data.object.status",
                ..
            })
        ));
    }
}

use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::job::{JobStatus, JobTransition};
use crate::models::organization::{BillingStatus, Organization, SubscriptionUpdate};
use crate::models::webhook_event::{
    EventEnvelope, JobCompletion, JobOutcome, SubscriptionChange, WebhookEvent, WebhookSource,
};
use crate::state::AppState;

/// What happened to one inbound webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Dispatched {
        event_id: String,
        effect: DispatchEffect,
    },
    /// The event id was already recorded; nothing was dispatched.
    Duplicate { event_id: String },
    /// Recorded, but the domain handler failed. The record keeps the failure for replay.
    DispatchFailed { event_id: String },
    Malformed {
        event_id: Option<String>,
        recorded: bool,
    },
    /// The store failed before the event was recorded; the provider will redeliver.
    NotRecorded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEffect {
    JobTransitioned { job_id: Uuid, status: JobStatus },
    JobAlreadyTerminal { job_id: Uuid },
    SubscriptionApplied { organization_id: Uuid },
    /// A newer billing event had already been applied.
    SubscriptionStale { organization_id: Uuid },
    Ignored { event_type: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("job {0} does not exist")]
    UnknownJob(Uuid),
    #[error("no organization matches subscription {0}")]
    UnknownOrganization(String),
    #[error("plan `{0}` is not in the catalog")]
    UnknownPlan(String),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOutcome {
    NotFound,
    AlreadyDispatched,
    Dispatched(DispatchEffect),
    Malformed(String),
    Failed(String),
}

/// Records a verified webhook body and, if it is new, dispatches it. Never fails: every
/// problem is reported through the returned outcome and the logs.
pub async fn ingest_webhook(state: &AppState, source: WebhookSource, body: &[u8]) -> IngestOutcome {
    let payload: Value = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(source = source.as_str(), %err, "webhook body is not valid JSON");
            return IngestOutcome::Malformed {
                event_id: None,
                recorded: false,
            };
        }
    };

    let envelope = match EventEnvelope::from_payload(source, &payload) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(source = source.as_str(), %err, "webhook payload has no usable id");
            return IngestOutcome::Malformed {
                event_id: None,
                recorded: false,
            };
        }
    };
    let event_id = envelope.event_id;

    match state
        .webhook_events
        .record_if_new(&event_id, source, &envelope.event_type, &payload)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            info!(%event_id, source = source.as_str(), "duplicate webhook delivery ignored");
            return IngestOutcome::Duplicate { event_id };
        }
        Err(err) => {
            error!(?err, %event_id, source = source.as_str(), "failed to record webhook event");
            return IngestOutcome::NotRecorded;
        }
    }

    let event = match WebhookEvent::parse(source, &payload) {
        Ok(event) => event,
        Err(err) => {
            warn!(%event_id, %err, "recorded webhook event is malformed");
            record_failure(state, &event_id, &format!("malformed: {err}")).await;
            return IngestOutcome::Malformed {
                event_id: Some(event_id),
                recorded: true,
            };
        }
    };

    match dispatch(state, &event).await {
        Ok(effect) => {
            if let Err(err) = state.webhook_events.mark_dispatched(&event_id).await {
                warn!(?err, %event_id, "failed to mark webhook event dispatched");
            }
            IngestOutcome::Dispatched { event_id, effect }
        }
        Err(err) => {
            error!(%err, %event_id, kind = event.kind(), "webhook dispatch failed");
            record_failure(state, &event_id, &err.to_string()).await;
            IngestOutcome::DispatchFailed { event_id }
        }
    }
}

/// Retries dispatch of a recorded event that has not been dispatched yet.
pub async fn replay_event(state: &AppState, event_id: &str) -> Result<ReplayOutcome, sqlx::Error> {
    let Some(record) = state.webhook_events.find_event(event_id).await? else {
        return Ok(ReplayOutcome::NotFound);
    };
    if record.dispatched_at.is_some() {
        return Ok(ReplayOutcome::AlreadyDispatched);
    }
    let Some(source) = WebhookSource::from_str(&record.source) else {
        return Ok(ReplayOutcome::Malformed(format!(
            "unknown source `{}`",
            record.source
        )));
    };
    let event = match WebhookEvent::parse(source, &record.payload) {
        Ok(event) => event,
        Err(err) => return Ok(ReplayOutcome::Malformed(err.to_string())),
    };

    match dispatch(state, &event).await {
        Ok(effect) => {
            state.webhook_events.mark_dispatched(event_id).await?;
            info!(%event_id, "webhook event replayed");
            Ok(ReplayOutcome::Dispatched(effect))
        }
        Err(err) => {
            let reason = err.to_string();
            warn!(%event_id, %reason, "webhook replay failed");
            state
                .webhook_events
                .mark_dispatch_failed(event_id, &reason)
                .await?;
            Ok(ReplayOutcome::Failed(reason))
        }
    }
}

/// Applies one typed event to the domain. Safe to call more than once for the same event.
pub async fn dispatch(
    state: &AppState,
    event: &WebhookEvent,
) -> Result<DispatchEffect, DispatchError> {
    match event {
        WebhookEvent::JobCompleted(completion) => complete_job(state, completion).await,
        WebhookEvent::SubscriptionChanged(change) => apply_subscription_change(state, change).await,
        WebhookEvent::Unknown { event_type, .. } => {
            info!(%event_type, "recorded webhook event with no handler");
            Ok(DispatchEffect::Ignored {
                event_type: event_type.clone(),
            })
        }
    }
}

async fn record_failure(state: &AppState, event_id: &str, reason: &str) {
    if let Err(err) = state
        .webhook_events
        .mark_dispatch_failed(event_id, reason)
        .await
    {
        warn!(?err, %event_id, "failed to store webhook dispatch failure");
    }
}

// Usage is charged at admission; completion only moves the job to its terminal state.
async fn complete_job(
    state: &AppState,
    completion: &JobCompletion,
) -> Result<DispatchEffect, DispatchError> {
    let (status, error) = match &completion.outcome {
        JobOutcome::Succeeded { .. } => (JobStatus::Completed, None),
        JobOutcome::Failed { reason } => (JobStatus::Failed, Some(reason.as_str())),
    };

    let transition = state
        .jobs
        .finish_job(completion.job_id, status, error, completion.occurred_at)
        .await?;

    match transition {
        JobTransition::Transitioned => {
            info!(job_id = %completion.job_id, status = ?status, "job finished");
            Ok(DispatchEffect::JobTransitioned {
                job_id: completion.job_id,
                status,
            })
        }
        JobTransition::AlreadyTerminal => Ok(DispatchEffect::JobAlreadyTerminal {
            job_id: completion.job_id,
        }),
        JobTransition::NotFound => Err(DispatchError::UnknownJob(completion.job_id)),
    }
}

async fn resolve_organization(
    state: &AppState,
    change: &SubscriptionChange,
) -> Result<Option<Organization>, sqlx::Error> {
    if let Some(id) = change.organization_id {
        if let Some(org) = state.organizations.find_organization(id).await? {
            return Ok(Some(org));
        }
    }
    if let Some(org) = state
        .organizations
        .find_by_subscription_id(&change.subscription_id)
        .await?
    {
        return Ok(Some(org));
    }
    match change.customer_id.as_deref() {
        Some(customer_id) => state.organizations.find_by_customer_id(customer_id).await,
        None => Ok(None),
    }
}

async fn apply_subscription_change(
    state: &AppState,
    change: &SubscriptionChange,
) -> Result<DispatchEffect, DispatchError> {
    let organization = resolve_organization(state, change)
        .await?
        .ok_or_else(|| DispatchError::UnknownOrganization(change.subscription_id.clone()))?;

    // A lapsed subscription keeps its current plan until the reconciler moves it to free.
    let plan = match change.plan_code.as_deref() {
        Some(code) if !change.status.is_lapsed() => {
            let plan = state
                .plans
                .get(code)
                .ok_or_else(|| DispatchError::UnknownPlan(code.to_string()))?;
            Some((plan.code.clone(), plan.monthly_quota))
        }
        _ => None,
    };

    if plan.is_none()
        && change.status == BillingStatus::Active
        && organization.billing_status == BillingStatus::CanceledDowngraded
    {
        warn!(
            organization_id = %organization.id,
            subscription_id = %change.subscription_id,
            plan = %organization.plan_code,
            "subscription reactivated without a plan; organization stays on its current plan"
        );
    }

    // The store keeps a `canceled_downgraded` marker when the incoming status is lapsed.
    let update = SubscriptionUpdate {
        status: change.status,
        plan,
        provider_customer_id: change.customer_id.clone(),
        provider_subscription_id: change.subscription_id.clone(),
        current_period_end: change.current_period_end,
        canceled_at: change.canceled_at,
        event_at: change.event_at,
    };

    if state
        .organizations
        .apply_subscription_update(organization.id, &update)
        .await?
    {
        info!(
            organization_id = %organization.id,
            status = change.status.as_str(),
            plan = ?update.plan.as_ref().map(|(code, _)| code),
            "subscription state applied"
        );
        Ok(DispatchEffect::SubscriptionApplied {
            organization_id: organization.id,
        })
    } else {
        info!(
            organization_id = %organization.id,
            event_at = %change.event_at,
            "stale subscription event ignored"
        );
        Ok(DispatchEffect::SubscriptionStale {
            organization_id: organization.id,
        })
    }
}

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use time::OffsetDateTime;
use tracing::warn;

use crate::dispatcher::{ingest_webhook, IngestOutcome};
use crate::models::webhook_event::WebhookSource;
use crate::responses::JsonResponse;
use crate::state::AppState;
use crate::utils::signature::verify_signature_header;

pub const BILLING_SIGNATURE_HEADER: &str = "Stripe-Signature";
pub const RUNNER_SIGNATURE_HEADER: &str = "X-Runner-Signature";

// POST /api/webhooks/billing
pub async fn billing_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let secret = app_state.config.billing_webhook_secret.clone();
    receive(
        &app_state,
        WebhookSource::Billing,
        &headers,
        BILLING_SIGNATURE_HEADER,
        &secret,
        &body,
    )
    .await
}

// POST /api/webhooks/jobs
pub async fn job_runner_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let secret = app_state.config.job_runner.webhook_secret.clone();
    receive(
        &app_state,
        WebhookSource::JobRunner,
        &headers,
        RUNNER_SIGNATURE_HEADER,
        &secret,
        &body,
    )
    .await
}

async fn receive(
    app_state: &AppState,
    source: WebhookSource,
    headers: &HeaderMap,
    signature_header: &str,
    secret: &str,
    body: &[u8],
) -> Response {
    let signature = headers.get(signature_header).and_then(|h| h.to_str().ok());
    if let Err(err) = verify_signature_header(
        signature,
        body,
        secret,
        app_state.config.webhook_tolerance_seconds,
        OffsetDateTime::now_utc().unix_timestamp(),
    ) {
        warn!(source = source.as_str(), %err, "webhook signature rejected");
        return JsonResponse::bad_request("Invalid webhook signature").into_response();
    }

    match ingest_webhook(app_state, source, body).await {
        IngestOutcome::NotRecorded => {
            JsonResponse::service_unavailable("Event not accepted, please retry").into_response()
        }
        IngestOutcome::Malformed { .. } => {
            Json(json!({ "received": true, "error": "malformed_payload" })).into_response()
        }
        IngestOutcome::Dispatched { .. }
        | IngestOutcome::Duplicate { .. }
        | IngestOutcome::DispatchFailed { .. } => Json(json!({ "received": true })).into_response(),
    }
}

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{error, info};

use crate::dispatcher::{replay_event, ReplayOutcome};
use crate::reconciler::{run_reconciliation, ReconcileOptions};
use crate::responses::JsonResponse;
use crate::state::AppState;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
const DEFAULT_FAILED_EVENTS_LIMIT: i64 = 50;
const MAX_FAILED_EVENTS_LIMIT: i64 = 500;

fn is_admin(headers: &HeaderMap, app_state: &AppState) -> bool {
    let Some(provided) = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let expected = app_state.config.admin_api_token.as_bytes();
    !expected.is_empty() && bool::from(provided.as_bytes().ct_eq(expected))
}

// POST /api/admin/reconcile
pub async fn reconcile(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_admin(&headers, &app_state) {
        return JsonResponse::unauthorized("Admin token required").into_response();
    }

    let options = if body.iter().all(u8::is_ascii_whitespace) {
        ReconcileOptions::default()
    } else {
        match serde_json::from_slice::<ReconcileOptions>(&body) {
            Ok(options) => options,
            Err(err) => {
                return JsonResponse::bad_request(&format!("Invalid reconcile options: {err}"))
                    .into_response()
            }
        }
    };

    info!(dry_run = options.dry_run, now = ?options.now, "manual reconciliation requested");
    match run_reconciliation(&app_state, options).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => {
            error!(%err, "manual reconciliation failed");
            JsonResponse::service_unavailable("Reconciliation could not run").into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct FailedEventsQuery {
    pub limit: Option<i64>,
}

// GET /api/admin/webhook-events/failed
pub async fn list_failed_events(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FailedEventsQuery>,
) -> Response {
    if !is_admin(&headers, &app_state) {
        return JsonResponse::unauthorized("Admin token required").into_response();
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_FAILED_EVENTS_LIMIT)
        .clamp(1, MAX_FAILED_EVENTS_LIMIT);

    match app_state.webhook_events.list_failed_events(limit).await {
        Ok(events) => Json(json!({ "success": true, "events": events })).into_response(),
        Err(err) => {
            error!(?err, "failed to list undispatched webhook events");
            JsonResponse::server_error("Failed to list events").into_response()
        }
    }
}

// POST /api/admin/webhook-events/{event_id}/replay
pub async fn replay_webhook_event(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Path(event_id): Path<String>,
) -> Response {
    if !is_admin(&headers, &app_state) {
        return JsonResponse::unauthorized("Admin token required").into_response();
    }

    match replay_event(&app_state, &event_id).await {
        Ok(ReplayOutcome::NotFound) => JsonResponse::not_found("Event not found").into_response(),
        Ok(ReplayOutcome::AlreadyDispatched) => {
            JsonResponse::success("Event was already dispatched").into_response()
        }
        Ok(ReplayOutcome::Dispatched(_)) => JsonResponse::success("Event dispatched").into_response(),
        Ok(ReplayOutcome::Malformed(reason)) => {
            JsonResponse::bad_request_with_code(&reason, "malformed_payload").into_response()
        }
        Ok(ReplayOutcome::Failed(reason)) => {
            JsonResponse::server_error(&format!("Dispatch failed: {reason}")).into_response()
        }
        Err(err) => {
            error!(?err, %event_id, "webhook replay store failure");
            JsonResponse::service_unavailable("Replay could not run").into_response()
        }
    }
}

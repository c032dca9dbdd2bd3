pub mod admin;
pub mod jobs;
pub mod org_context;
pub mod quota;
pub mod webhooks;

use axum::{
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};

use crate::responses::JsonResponse;
use crate::state::AppState;

/// All application routes; transport layers (CORS, tracing, rate limiting) are added by `main`.
pub fn api_router() -> Router<AppState> {
    let admin_routes = Router::new()
        .route("/reconcile", post(admin::reconcile))
        .route("/webhook-events/failed", get(admin::list_failed_events))
        .route(
            "/webhook-events/{event_id}/replay",
            post(admin::replay_webhook_event),
        );

    let webhook_routes = Router::new()
        .route("/billing", post(webhooks::billing_webhook))
        .route("/jobs", post(webhooks::job_runner_webhook));

    Router::new()
        .route("/health", get(health))
        .route("/api/jobs", post(jobs::create_job))
        .route("/api/jobs/{job_id}", get(jobs::get_job))
        .route("/api/quota", get(quota::get_quota))
        .nest("/api/webhooks", webhook_routes)
        .nest("/api/admin", admin_routes)
}

async fn health() -> Response {
    JsonResponse::success("ok").into_response()
}

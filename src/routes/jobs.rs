use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::admission::{admit_job, AdmissionDecision, AdmissionError, JobRequest};
use crate::responses::JsonResponse;
use crate::routes::org_context::OrgContext;
use crate::state::AppState;

// POST /api/jobs
pub async fn create_job(
    State(app_state): State<AppState>,
    OrgContext(organization_id): OrgContext,
    Json(body): Json<JobRequest>,
) -> Response {
    match admit_job(&app_state, organization_id, &body).await {
        Ok(AdmissionDecision::Accepted(job)) => (
            StatusCode::ACCEPTED,
            Json(json!({ "success": true, "job": job })),
        )
            .into_response(),
        Ok(AdmissionDecision::QuotaExceeded {
            used,
            limit,
            upgrade_url,
        }) => JsonResponse::quota_exceeded(used, limit, &upgrade_url).into_response(),
        Ok(AdmissionDecision::Unauthenticated) => {
            JsonResponse::unauthorized("Unknown organization").into_response()
        }
        Err(AdmissionError::InvalidJobSpec(msg)) => {
            JsonResponse::bad_request_with_code(&msg, "invalid_job").into_response()
        }
        Err(AdmissionError::Store(err)) => {
            error!(?err, %organization_id, "job admission store failure");
            JsonResponse::service_unavailable("Unable to process the job right now. Please retry.")
                .into_response()
        }
        Err(AdmissionError::Submission(_)) => {
            JsonResponse::bad_gateway("The job could not be started. Please retry.").into_response()
        }
    }
}

// GET /api/jobs/{job_id}
pub async fn get_job(
    State(app_state): State<AppState>,
    OrgContext(organization_id): OrgContext,
    Path(job_id): Path<Uuid>,
) -> Response {
    match app_state.jobs.find_job(organization_id, job_id).await {
        Ok(Some(job)) => Json(json!({ "success": true, "job": job })).into_response(),
        Ok(None) => JsonResponse::not_found("Job not found").into_response(),
        Err(err) => {
            error!(?err, %job_id, "failed to load job");
            JsonResponse::service_unavailable("Unable to load the job right now.").into_response()
        }
    }
}

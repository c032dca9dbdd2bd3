use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use time::OffsetDateTime;
use tracing::error;

use crate::admission::quota_status;
use crate::responses::JsonResponse;
use crate::routes::org_context::OrgContext;
use crate::state::AppState;

// GET /api/quota
pub async fn get_quota(
    State(app_state): State<AppState>,
    OrgContext(organization_id): OrgContext,
) -> Response {
    match quota_status(&app_state, organization_id, OffsetDateTime::now_utc()).await {
        Ok(Some(status)) => Json(status).into_response(),
        Ok(None) => JsonResponse::unauthorized("Unknown organization").into_response(),
        Err(err) => {
            error!(?err, %organization_id, "failed to load quota status");
            JsonResponse::service_unavailable("Unable to load usage right now.").into_response()
        }
    }
}

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct JsonResponse {
    pub status: String,
    pub success: bool,
    pub message: String,
    pub code: Option<String>,
}

/// Body of a `402 Payment Required` answer to a job submission over quota.
#[derive(Serialize, Deserialize)]
pub struct QuotaExceededResponse {
    pub status: String,
    pub success: bool,
    pub message: String,
    pub code: String,
    pub used: i64,
    pub limit: i64,
    pub upgrade_url: String,
}

impl JsonResponse {
    fn error(status: StatusCode, msg: &str, code: Option<&str>) -> (StatusCode, Json<JsonResponse>) {
        (
            status,
            Json(JsonResponse {
                status: "error".to_string(),
                success: false,
                message: msg.to_string(),
                code: code.map(str::to_string),
            }),
        )
    }

    pub fn success(msg: &str) -> impl IntoResponse {
        (
            StatusCode::OK,
            Json(JsonResponse {
                status: "success".to_string(),
                success: true,
                message: msg.to_string(),
                code: None,
            }),
        )
    }

    pub fn not_found(msg: &str) -> impl IntoResponse {
        Self::error(StatusCode::NOT_FOUND, msg, None)
    }

    pub fn server_error(msg: &str) -> impl IntoResponse {
        Self::error(StatusCode::INTERNAL_SERVER_ERROR, msg, None)
    }

    pub fn unauthorized(msg: &str) -> impl IntoResponse {
        Self::error(StatusCode::UNAUTHORIZED, msg, None)
    }

    pub fn bad_request(msg: &str) -> impl IntoResponse {
        Self::error(StatusCode::BAD_REQUEST, msg, None)
    }

    pub fn bad_request_with_code(msg: &str, code: &str) -> impl IntoResponse {
        Self::error(StatusCode::BAD_REQUEST, msg, Some(code))
    }

    pub fn too_many_requests(msg: &str) -> impl IntoResponse {
        Self::error(StatusCode::TOO_MANY_REQUESTS, msg, None)
    }

    pub fn bad_gateway(msg: &str) -> impl IntoResponse {
        Self::error(StatusCode::BAD_GATEWAY, msg, None)
    }

    pub fn service_unavailable(msg: &str) -> impl IntoResponse {
        Self::error(StatusCode::SERVICE_UNAVAILABLE, msg, None)
    }

    pub fn quota_exceeded(used: i64, limit: i64, upgrade_url: &str) -> impl IntoResponse {
        (
            StatusCode::PAYMENT_REQUIRED,
            Json(QuotaExceededResponse {
                status: "error".to_string(),
                success: false,
                message: format!(
                    "Monthly quota of {limit} jobs reached. Upgrade your plan to continue."
                ),
                code: "quota_exceeded".to_string(),
                used,
                limit,
                upgrade_url: upgrade_url.to_string(),
            }),
        )
    }
}

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::responses::JsonResponse;

pub const ORGANIZATION_HEADER: &str = "x-organization-id";

/// Organization id asserted by the upstream gateway. Existence is checked by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrgContext(pub Uuid);

impl<S> FromRequestParts<S> for OrgContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ORGANIZATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(OrgContext)
            .ok_or_else(|| JsonResponse::unauthorized("Unknown organization").into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    async fn extract(header: Option<&str>) -> Result<OrgContext, Response> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(ORGANIZATION_HEADER, value);
        }
        let mut parts = builder.body(()).unwrap().into_parts().0;
        OrgContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn parses_header() {
        let id = Uuid::new_v4();
        let ctx = extract(Some(&id.to_string())).await.unwrap();
        assert_eq!(ctx, OrgContext(id));
    }

    #[tokio::test]
    async fn missing_or_invalid_header_is_unauthorized() {
        for header in [None, Some("not-a-uuid"), Some("")] {
            let rejection = extract(header).await.unwrap_err();
            assert_eq!(rejection.status(), StatusCode::UNAUTHORIZED);
        }
    }
}

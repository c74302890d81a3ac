use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use service_core::error::error_response;
use subtle::ConstantTimeEq;

use crate::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-api-key";

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let api_key = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    let expected = state.config.security.admin_api_key.as_bytes();

    match api_key {
        Some(key) if !expected.is_empty() && bool::from(key.as_bytes().ct_eq(expected)) => {
            next.run(request).await
        }
        _ => {
            tracing::warn!(path = %request.uri().path(), "Failed admin authentication attempt");
            error_response(
                StatusCode::UNAUTHORIZED,
                "Unauthorized: Invalid or missing admin API key".to_string(),
                Some("admin_unauthorized"),
                None,
                None,
            )
        }
    }
}

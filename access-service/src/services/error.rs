use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use service_core::error::error_response;
use std::time::Duration;
use thiserror::Error;

use crate::models::ScopeError;

/// Every way the authorization layer can refuse a request.
///
/// Each variant maps to one HTTP status and one stable `code`; the calling
/// application turns the code into a localized message.
#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Malformed access token")]
    TokenFormatInvalid,

    #[error("Access token not found")]
    TokenNotFound,

    #[error("Access token revoked")]
    TokenRevoked,

    #[error("Access token expired")]
    TokenExpired,

    #[error("Access token has no remaining uses")]
    TokenExhausted,

    #[error("Outside the scope of this access grant: {0}")]
    ScopeMismatch(String),

    #[error("Request origin not allowed: {0}")]
    AntiHotlinkRejected(String),

    #[error("Too many requests")]
    RateLimitExceeded {
        retry_after: Option<Duration>,
        limit: u32,
    },

    #[error("Failed to issue signed URL: {0}")]
    SignedUrlIssuanceFailed(anyhow::Error),

    #[error("Invalid token scope: {0}")]
    InvalidScope(#[from] ScopeError),

    #[error("max_uses must be at least 1, got {0}")]
    InvalidUseLimit(i64),

    #[error("Storage error: {0}")]
    Storage(anyhow::Error),
}

impl AccessError {
    /// Stable snake_case identifier of the rejection kind.
    pub fn code(&self) -> &'static str {
        match self {
            AccessError::TokenFormatInvalid => "token_format_invalid",
            AccessError::TokenNotFound => "token_not_found",
            AccessError::TokenRevoked => "token_revoked",
            AccessError::TokenExpired => "token_expired",
            AccessError::TokenExhausted => "token_exhausted",
            AccessError::ScopeMismatch(_) => "scope_mismatch",
            AccessError::AntiHotlinkRejected(_) => "anti_hotlink_rejected",
            AccessError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            AccessError::SignedUrlIssuanceFailed(_) => "signed_url_issuance_failed",
            AccessError::InvalidScope(_) => "invalid_scope",
            AccessError::InvalidUseLimit(_) => "invalid_max_uses",
            AccessError::Storage(_) => "storage_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AccessError::TokenFormatInvalid
            | AccessError::InvalidScope(_)
            | AccessError::InvalidUseLimit(_) => StatusCode::BAD_REQUEST,
            AccessError::TokenNotFound => StatusCode::NOT_FOUND,
            AccessError::TokenRevoked | AccessError::TokenExpired | AccessError::TokenExhausted => {
                StatusCode::UNAUTHORIZED
            }
            AccessError::ScopeMismatch(_) | AccessError::AntiHotlinkRejected(_) => {
                StatusCode::FORBIDDEN
            }
            AccessError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AccessError::SignedUrlIssuanceFailed(_) | AccessError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether this is a decision about the caller rather than an
    /// infrastructure failure.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            AccessError::SignedUrlIssuanceFailed(_) | AccessError::Storage(_)
        )
    }
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        match self {
            AccessError::RateLimitExceeded { retry_after, limit } => {
                // Round up so a client never retries inside the same window.
                let retry_secs = retry_after.map(|d| d.as_secs() + u64::from(d.subsec_nanos() > 0));
                let mut res = error_response(
                    status,
                    "Too many requests. Please try again later.".to_string(),
                    Some(code),
                    None,
                    retry_secs,
                );
                res.headers_mut()
                    .insert("x-ratelimit-limit", HeaderValue::from(limit));
                res
            }
            AccessError::SignedUrlIssuanceFailed(ref err) | AccessError::Storage(ref err) => {
                tracing::error!(error = %err, code, "Access layer infrastructure failure");
                error_response(
                    status,
                    "Internal server error".to_string(),
                    Some(code),
                    None,
                    None,
                )
            }
            other => error_response(status, other.to_string(), Some(code), None, None),
        }
    }
}

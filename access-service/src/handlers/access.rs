use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use std::time::Instant;
use uuid::Uuid;

use crate::dtos::access::{AssetUrlQuery, GrantResponse, SignedUrlResponse};
use crate::middleware::AccessContext;
use crate::models::{AccessAction, AccessLog};
use crate::services::token::mask_token;
use crate::services::{
    AccessError, ActionClass, RateDecision, RateIdentity, ResolvedGrant, UrlIntent,
};
use crate::AppState;

pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

struct Authorized {
    grant: ResolvedGrant,
    limit: u32,
    remaining: u32,
}

/// Resolve the token, then count the request against its quota.
///
/// Also returns the token id when resolution succeeded, for the audit row.
async fn authorize(
    state: &AppState,
    ctx: &AccessContext,
    presented: &str,
    class: ActionClass,
) -> (Option<Uuid>, Result<Authorized, AccessError>) {
    match state.resolver.resolve(ctx.tenant_id(), presented).await {
        Ok(grant) => {
            let token_id = grant.token_id;
            let decision = state
                .rate_limiter
                .check(&RateIdentity::Token(token_id), class)
                .await;
            let result = match decision {
                RateDecision::Allowed { remaining, limit } => Ok(Authorized {
                    grant,
                    limit,
                    remaining,
                }),
                RateDecision::Throttled { retry_after, limit } => {
                    Err(AccessError::RateLimitExceeded { retry_after, limit })
                }
            };
            (Some(token_id), result)
        }
        Err(err) => {
            // Callers without a valid token are counted by address so that
            // guessing tokens is throttled as well.
            if let (true, Some(ip)) = (err.is_rejection(), ctx.request.ip) {
                if let RateDecision::Throttled { retry_after, limit } = state
                    .rate_limiter
                    .check(&RateIdentity::Address(ip), class)
                    .await
                {
                    return (None, Err(AccessError::RateLimitExceeded { retry_after, limit }));
                }
            }
            (None, Err(err))
        }
    }
}

struct AuditFields<'a> {
    path: String,
    action: AccessAction,
    presented: &'a str,
    token_id: Option<Uuid>,
    started: Instant,
}

fn record(state: &AppState, ctx: &AccessContext, fields: AuditFields<'_>, error: Option<&AccessError>) {
    let token_mask = (!fields.presented.is_empty()).then(|| mask_token(fields.presented));
    let entry = AccessLog::new(ctx.tenant_id().to_string(), fields.path, fields.action)
        .with_token(token_mask, fields.token_id)
        .with_client(ctx.ip_string(), ctx.request.user_agent.clone())
        .finish(
            error.is_none(),
            error.map(|e| e.code().to_string()),
            fields.started.elapsed(),
        );
    state.audit.record(entry);
}

fn with_rate_headers(mut response: Response, limit: u32, remaining: u32) -> Response {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    response
}

/// `X-Access-Token`, then `Authorization: Bearer`, then `?token=`.
fn presented_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let from_header = headers
        .get(ACCESS_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let from_bearer = || {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    from_header
        .or_else(from_bearer)
        .or(query_token)
        .map(str::to_string)
}

/// `GET /access/:token`: open a gallery link.
pub async fn get_gallery(
    State(state): State<AppState>,
    ctx: AccessContext,
    Path(token): Path<String>,
) -> Response {
    let started = Instant::now();
    let (token_id, result) = authorize(&state, &ctx, &token, ActionClass::GalleryFetch).await;

    record(
        &state,
        &ctx,
        AuditFields {
            path: format!("/access/{}", mask_token(&token)),
            action: AccessAction::ListFolders,
            presented: &token,
            token_id,
            started,
        },
        result.as_ref().err(),
    );

    match result {
        Ok(auth) => with_rate_headers(
            Json(GrantResponse::from(auth.grant)).into_response(),
            auth.limit,
            auth.remaining,
        ),
        Err(e) => e.into_response(),
    }
}

/// `GET /access/assets/:asset_id/url`: mint a signed URL for one asset.
pub async fn get_asset_url(
    State(state): State<AppState>,
    ctx: AccessContext,
    Path(asset_id): Path<Uuid>,
    Query(query): Query<AssetUrlQuery>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let presented = presented_token(&headers, query.token.as_deref()).unwrap_or_default();
    let (intent, action) = if query.download {
        (UrlIntent::Download, AccessAction::Download)
    } else {
        (UrlIntent::Preview, AccessAction::View)
    };

    // A foreign page must be turned away before the token spends a use.
    let (token_id, authorized) = match state.signed_urls.check_origin(&ctx.request) {
        Ok(()) => authorize(&state, &ctx, &presented, ActionClass::SignedUrl).await,
        Err(e) => (None, Err(e)),
    };
    let result = match authorized {
        Ok(auth) => state
            .signed_urls
            .issue(&auth.grant, asset_id, &ctx.request, intent)
            .await
            .map(|signed| (signed, auth.limit, auth.remaining)),
        Err(e) => Err(e),
    };

    record(
        &state,
        &ctx,
        AuditFields {
            path: format!("/access/assets/{}/url", asset_id),
            action,
            presented: &presented,
            token_id,
            started,
        },
        result.as_ref().err(),
    );

    match result {
        Ok((signed, limit, remaining)) => with_rate_headers(
            Json(SignedUrlResponse { signed }).into_response(),
            limit,
            remaining,
        ),
        Err(e) => e.into_response(),
    }
}

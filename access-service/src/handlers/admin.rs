use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;

use crate::config::load_tenant_domains;
use crate::dtos::admin::{
    IssueTokenRequest, IssueTokenResponse, ReloadDomainsResponse, RevokeTokenResponse,
};
use crate::middleware::AccessContext;
use crate::services::AccessError;
use crate::utils::ValidatedJson;
use crate::AppState;

/// `POST /admin/tokens`
pub async fn issue_token(
    State(state): State<AppState>,
    ctx: AccessContext,
    ValidatedJson(req): ValidatedJson<IssueTokenRequest>,
) -> Result<impl IntoResponse, AccessError> {
    // An explicit tenant in the body outranks header and host.
    let tenant_id = req
        .tenant_id
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(ctx.tenant_id())
        .to_string();

    let issued = state
        .issuer
        .issue(&tenant_id, req.into_new_token(Utc::now()))
        .await?;

    Ok((StatusCode::CREATED, Json(IssueTokenResponse::from(issued))))
}

/// `POST /admin/tokens/:id/revoke`
pub async fn revoke_token(
    State(state): State<AppState>,
    ctx: AccessContext,
    Path(token_id): Path<Uuid>,
) -> Result<impl IntoResponse, AccessError> {
    let record = state.issuer.revoke(ctx.tenant_id(), token_id).await?;

    Ok(Json(RevokeTokenResponse {
        token_id: record.id,
        revoked_at: record.revoked_at,
    }))
}

/// `POST /admin/tenant-domains/reload`: re-read `TENANT_DOMAINS`.
pub async fn reload_tenant_domains(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let domains = load_tenant_domains()?;
    let entries = domains.len();
    state.tenants.replace_domains(domains);

    Ok(Json(ReloadDomainsResponse { entries }))
}

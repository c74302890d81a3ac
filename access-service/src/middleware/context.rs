//! Per-request tenant and client attributes.
//!
//! Tenant resolution here only sees the `X-Tenant-Id` header and the host;
//! an explicit override (e.g. an admin request body) is applied by the
//! handler that carries it.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use service_core::utils::client_ip;
use std::convert::Infallible;

use crate::services::{RequestContext, TenantResolution};
use crate::AppState;

pub const TENANT_HEADER: &str = "x-tenant-id";

#[derive(Debug, Clone)]
pub struct AccessContext {
    pub tenant: TenantResolution,
    pub request: RequestContext,
}

impl AccessContext {
    pub fn tenant_id(&self) -> &str {
        &self.tenant.tenant_id
    }

    pub fn ip_string(&self) -> Option<String> {
        self.request.ip.map(|ip| ip.to_string())
    }
}

fn header_str(headers: &HeaderMap, name: impl header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[async_trait]
impl FromRequestParts<AppState> for AccessContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        let host = header_str(headers, header::HOST)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()));
        let tenant_header = header_str(headers, TENANT_HEADER);

        let tenant = state
            .tenants
            .resolve(None, tenant_header.as_deref(), host.as_deref());

        let request = RequestContext {
            origin: header_str(headers, header::ORIGIN),
            referer: header_str(headers, header::REFERER),
            ip: client_ip(
                headers,
                &parts.extensions,
                &state.config.security.trusted_proxies,
            ),
            user_agent: header_str(headers, header::USER_AGENT),
        };

        Ok(Self { tenant, request })
    }
}

pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AccessConfig;
use crate::services::{
    AccessAuditLogger, AccessLogSink, AssetCatalog, HotlinkGuard, RateLimitStore, RateLimiter,
    SignedUrlIssuer, TenantResolver, TokenIssuer, TokenResolver, TokenStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AccessConfig,
    pub tokens: Arc<dyn TokenStore>,
    pub tenants: Arc<TenantResolver>,
    pub issuer: TokenIssuer,
    pub resolver: TokenResolver,
    pub rate_limiter: RateLimiter,
    pub signed_urls: SignedUrlIssuer,
    pub audit: AccessAuditLogger,
}

impl AppState {
    pub fn new(
        config: AccessConfig,
        tokens: Arc<dyn TokenStore>,
        logs: Arc<dyn AccessLogSink>,
        assets: Arc<dyn AssetCatalog>,
        counters: Arc<dyn RateLimitStore>,
    ) -> Self {
        let tenants = Arc::new(TenantResolver::new(
            config.tenancy.default_tenant_id.clone(),
            config.tenancy.domains.clone(),
        ));
        let guard = HotlinkGuard::new(&config.security.allowed_origins);

        Self {
            issuer: TokenIssuer::new(tokens.clone()),
            resolver: TokenResolver::new(tokens.clone()),
            rate_limiter: RateLimiter::new(counters, &config.rate_limit),
            signed_urls: SignedUrlIssuer::new(assets, guard, &config.signed_url),
            audit: AccessAuditLogger::new(logs),
            tenants,
            tokens,
            config,
        }
    }
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let admin_routes = Router::new()
        .route("/admin/tokens", post(handlers::admin::issue_token))
        .route(
            "/admin/tokens/:token_id/revoke",
            post(handlers::admin::revoke_token),
        )
        .route(
            "/admin/tenant-domains/reload",
            post(handlers::admin::reload_tenant_domains),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::admin_auth_middleware,
        ));

    let allowed_origins = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) if !o.contains('*') => Some(value),
            Ok(_) => None,
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/access/assets/:asset_id/url",
            get(handlers::access::get_asset_url),
        )
        .route("/access/:token", get(handlers::access::get_gallery))
        .merge(admin_routes)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");
                let route = request
                    .extensions()
                    .get::<axum::extract::MatchedPath>()
                    .map(|p| p.as_str())
                    .unwrap_or("unmatched");

                // The raw URI may carry a token, so only the route template is recorded.
                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    route = %route,
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static("x-access-token"),
                    HeaderName::from_static("x-tenant-id"),
                    HeaderName::from_static("x-admin-api-key"),
                ])
                .expose_headers([
                    header::RETRY_AFTER,
                    HeaderName::from_static("x-ratelimit-limit"),
                    HeaderName::from_static("x-ratelimit-remaining"),
                    HeaderName::from_static("x-request-id"),
                ]),
        );

    Ok(app)
}

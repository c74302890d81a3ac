//! Shared setup for access-service integration tests.
//!
//! Everything runs on the in-memory stores; no database or Redis needed.

#![allow(dead_code)]

use access_service::{
    build_router,
    config::{
        AccessConfig, DatabaseConfig, PersistenceBackend, QuotaConfig, RateLimitBackend,
        RateLimitConfig, RedisConfig, SecurityConfig, SignedUrlConfig, TenancyConfig,
    },
    models::{AssetRecord, TokenScope},
    services::{
        InMemoryStore, IssuedToken, LocalCounterStore, NewAccessToken, TenantDomainMap,
    },
    AppState,
};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{request, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use secrecy::Secret;
use service_core::config::{Config, Environment};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const TEST_ADMIN_API_KEY: &str = "test-admin-key-12345";
pub const TEST_SIGNING_SECRET: &str = "test-signing-secret";
pub const TENANT_A: &str = "tenant-a";
pub const TENANT_B: &str = "tenant-b";
pub const PORTAL_ORIGIN: &str = "https://portal.example.com";
pub const TRUSTED_PROXY: &str = "10.0.0.1";

pub fn test_config(limit: u32) -> AccessConfig {
    let quota = QuotaConfig {
        limit,
        window_seconds: 60,
    };

    AccessConfig {
        common: Config::default(),
        environment: Environment::Dev,
        service_name: "access-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        persistence: PersistenceBackend::Memory,
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 1,
            min_connections: 0,
        },
        redis: RedisConfig { url: None },
        rate_limit: RateLimitConfig {
            backend: RateLimitBackend::Local,
            gallery: quota,
            signed_url: quota,
            checkout: quota,
            webhook: quota,
        },
        tenancy: TenancyConfig {
            default_tenant_id: TENANT_A.to_string(),
            domains: TenantDomainMap::parse(
                "portal.example.com=tenant-a,*.schools-b.example.com=tenant-b",
            )
            .unwrap(),
        },
        signed_url: SignedUrlConfig {
            base_url: "https://media.example.com".to_string(),
            ttl_seconds: 300,
            secret: Secret::new(TEST_SIGNING_SECRET.to_string()),
        },
        security: SecurityConfig {
            allowed_origins: vec![PORTAL_ORIGIN.to_string()],
            trusted_proxies: vec![TRUSTED_PROXY.parse().unwrap()],
            admin_api_key: TEST_ADMIN_API_KEY.to_string(),
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_limit(100).await
    }

    pub async fn with_limit(limit: u32) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let state = AppState::new(
            test_config(limit),
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(LocalCounterStore::new()),
        );
        let router = build_router(state.clone())
            .await
            .expect("Failed to build router");

        Self {
            router,
            state,
            store,
        }
    }

    pub async fn issue(&self, tenant_id: &str, request: NewAccessToken) -> IssuedToken {
        self.state
            .issuer
            .issue(tenant_id, request)
            .await
            .expect("Failed to issue token")
    }

    /// An asset of `scope`'s event, course and (for family scopes) subject.
    pub fn asset_for(&self, tenant_id: &str, scope: &TokenScope) -> AssetRecord {
        let asset = AssetRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            event_id: scope.event_id(),
            course_id: scope.course_id(),
            subject_ids: scope.subject_id().into_iter().collect(),
            storage_key: format!("{}/{}/IMG_{}.jpg", tenant_id, scope.event_id(), Uuid::new_v4()),
        };
        self.store.insert_asset(asset.clone());
        asset
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request")
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Wait for fire-and-forget audit writes.
    pub async fn flush_audit(&self) {
        self.state.audit.flush().await;
    }
}

pub fn family_scope() -> TokenScope {
    TokenScope::Family {
        event_id: Uuid::new_v4(),
        course_id: Uuid::new_v4(),
        subject_id: Uuid::new_v4(),
    }
}

pub fn event_scope() -> TokenScope {
    TokenScope::Event {
        event_id: Uuid::new_v4(),
    }
}

/// Record `peer` as the socket address, as `into_make_service_with_connect_info` would.
pub fn from_peer(builder: request::Builder, peer: &str) -> request::Builder {
    builder.extension(ConnectInfo(SocketAddr::new(peer.parse().unwrap(), 40000)))
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

pub async fn assert_error(response: Response, status: StatusCode, code: &str) {
    assert_eq!(response.status(), status);
    let body = body_json(response).await;
    assert_eq!(body["code"], code, "unexpected body: {}", body);
}

mod common;

use access_service::models::AccessAction;
use access_service::services::NewAccessToken;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::{
    assert_error, body_json, family_scope, TestApp, PORTAL_ORIGIN, TEST_SIGNING_SECRET,
};
use service_core::utils::validate_asset_signature;
use std::collections::HashMap;
use url::Url;
use uuid::Uuid;

fn asset_request(asset_id: Uuid, token: &str, query: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/access/assets/{}/url{}", asset_id, query))
        .header("x-access-token", token)
        .header(header::ORIGIN, PORTAL_ORIGIN)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_preview_url_is_signed_and_inline() {
    let app = TestApp::new().await;
    let scope = family_scope();
    let issued = app.issue("tenant-a", NewAccessToken::new(scope)).await;
    let asset = app.asset_for("tenant-a", &scope);

    let response = app.send(asset_request(asset.id, &issued.token, "")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["downloadable"], false);
    assert_eq!(body["expires_in_seconds"], 300);

    let url = Url::parse(body["url"].as_str().unwrap()).unwrap();
    assert_eq!(url.host_str(), Some("media.example.com"));
    assert!(url.path().ends_with(&asset.storage_key));

    let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(query["disposition"], "inline");
    let expires: i64 = query["expires"].parse().unwrap();
    assert_eq!(expires, body["expires_at"].as_i64().unwrap());

    assert!(validate_asset_signature(
        TEST_SIGNING_SECRET,
        &asset.storage_key,
        expires,
        "inline",
        &query["sig"],
        expires - 1,
    )
    .is_ok());
    // The disposition is bound into the signature.
    assert!(validate_asset_signature(
        TEST_SIGNING_SECRET,
        &asset.storage_key,
        expires,
        "attachment",
        &query["sig"],
        expires - 1,
    )
    .is_err());
}

#[tokio::test]
async fn test_download_requires_download_permission() {
    let app = TestApp::new().await;
    let scope = family_scope();
    let view_only = app.issue("tenant-a", NewAccessToken::new(scope)).await;
    let asset = app.asset_for("tenant-a", &scope);

    assert_error(
        app.send(asset_request(asset.id, &view_only.token, "?download=true"))
            .await,
        StatusCode::FORBIDDEN,
        "scope_mismatch",
    )
    .await;

    let mut request = NewAccessToken::new(scope);
    request.can_download = true;
    let downloader = app.issue("tenant-a", request).await;

    let response = app
        .send(asset_request(asset.id, &downloader.token, "?download=true"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["downloadable"], true);
    assert!(body["url"]
        .as_str()
        .unwrap()
        .contains("disposition=attachment"));
}

#[tokio::test]
async fn test_asset_outside_scope_is_forbidden() {
    let app = TestApp::new().await;
    let issued = app.issue("tenant-a", NewAccessToken::new(family_scope())).await;
    let other_family = app.asset_for("tenant-a", &family_scope());

    assert_error(
        app.send(asset_request(other_family.id, &issued.token, ""))
            .await,
        StatusCode::FORBIDDEN,
        "scope_mismatch",
    )
    .await;

    assert_error(
        app.send(asset_request(Uuid::new_v4(), &issued.token, "")).await,
        StatusCode::FORBIDDEN,
        "scope_mismatch",
    )
    .await;
}

#[tokio::test]
async fn test_hotlinked_referer_is_rejected() {
    let app = TestApp::new().await;
    let scope = family_scope();
    let issued = app.issue("tenant-a", NewAccessToken::new(scope)).await;
    let asset = app.asset_for("tenant-a", &scope);

    let response = app
        .send(
            Request::builder()
                .uri(format!("/access/assets/{}/url", asset.id))
                .header("x-access-token", &issued.token)
                .header(header::REFERER, "https://evil.example.net/page")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_error(response, StatusCode::FORBIDDEN, "anti_hotlink_rejected").await;

    // No Origin or Referer at all: native clients are allowed.
    let response = app
        .send(
            Request::builder()
                .uri(format!("/access/assets/{}/url", asset.id))
                .header("x-access-token", &issued.token)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_hotlinked_requests_do_not_spend_uses() {
    let app = TestApp::new().await;
    let scope = family_scope();
    let mut request = NewAccessToken::new(scope);
    request.max_uses = Some(2);
    let issued = app.issue("tenant-a", request).await;
    let asset = app.asset_for("tenant-a", &scope);

    for _ in 0..2 {
        let response = app
            .send(
                Request::builder()
                    .uri(format!("/access/assets/{}/url", asset.id))
                    .header("x-access-token", &issued.token)
                    .header(header::REFERER, "https://evil.example.net/page")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_error(response, StatusCode::FORBIDDEN, "anti_hotlink_rejected").await;
    }

    let response = app.send(asset_request(asset.id, &issued.token, "")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.store.token(issued.record.id).unwrap().used_count, 1);

    app.flush_audit().await;
    let logs = app.store.logs();
    assert_eq!(logs.len(), 3);
    let rejected: Vec<_> = logs.iter().filter(|l| !l.ok).collect();
    assert_eq!(rejected.len(), 2);
    for log in rejected {
        assert_eq!(log.notes.as_deref(), Some("anti_hotlink_rejected"));
        assert_eq!(log.access_token_id, None);
    }
}

#[tokio::test]
async fn test_token_accepted_from_bearer_and_query() {
    let app = TestApp::new().await;
    let scope = family_scope();
    let issued = app.issue("tenant-a", NewAccessToken::new(scope)).await;
    let asset = app.asset_for("tenant-a", &scope);

    let bearer = app
        .send(
            Request::builder()
                .uri(format!("/access/assets/{}/url", asset.id))
                .header(header::AUTHORIZATION, format!("Bearer {}", issued.token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(bearer.status(), StatusCode::OK);

    let query = app
        .get(&format!(
            "/access/assets/{}/url?token={}",
            asset.id, issued.token
        ))
        .await;
    assert_eq!(query.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_token_is_bad_request() {
    let app = TestApp::new().await;

    assert_error(
        app.get(&format!("/access/assets/{}/url", Uuid::new_v4()))
            .await,
        StatusCode::BAD_REQUEST,
        "token_format_invalid",
    )
    .await;
}

#[tokio::test]
async fn test_catalog_failure_is_internal_error() {
    let app = TestApp::new().await;
    let scope = family_scope();
    let issued = app.issue("tenant-a", NewAccessToken::new(scope)).await;
    let asset = app.asset_for("tenant-a", &scope);
    app.store.set_fail_asset_lookups(true);

    assert_error(
        app.send(asset_request(asset.id, &issued.token, "")).await,
        StatusCode::INTERNAL_SERVER_ERROR,
        "signed_url_issuance_failed",
    )
    .await;
}

#[tokio::test]
async fn test_download_attempt_is_audited_as_download() {
    let app = TestApp::new().await;
    let scope = family_scope();
    let issued = app.issue("tenant-a", NewAccessToken::new(scope)).await;
    let asset = app.asset_for("tenant-a", &scope);

    app.send(asset_request(asset.id, &issued.token, "?download=true"))
        .await;
    app.flush_audit().await;

    let logs = app.store.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, AccessAction::Download);
    assert!(!logs[0].ok);
    assert_eq!(logs[0].notes.as_deref(), Some("scope_mismatch"));
    assert_eq!(logs[0].path, format!("/access/assets/{}/url", asset.id));
    assert_eq!(logs[0].access_token_id, Some(issued.record.id));
}

use axum::{extract::Request, http::header, middleware::Next, response::IntoResponse};

/// Path prefixes whose responses carry capability material (tokens, grants,
/// signed URLs) and must never be stored by intermediaries.
const NO_STORE_PREFIXES: &[&str] = &["/access", "/admin"];

pub async fn security_headers_middleware(req: Request, next: Next) -> impl IntoResponse {
    let no_store = NO_STORE_PREFIXES
        .iter()
        .any(|prefix| req.uri().path().starts_with(prefix));

    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        header::HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        header::HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        header::HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    headers.insert(
        header::X_FRAME_OPTIONS,
        header::HeaderValue::from_static("DENY"),
    );
    // Signed URLs and gallery links must not leak through the Referer of
    // outbound navigations.
    headers.insert(
        header::REFERRER_POLICY,
        header::HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    if no_store {
        headers.insert(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("no-store"),
        );
    }

    response
}

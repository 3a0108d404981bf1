//! HTTP caching middleware for immutable cached assets

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

pub async fn http_cache(
    State(max_age_sec): State<usize>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let response = next.run(request).await.into_response();
    if !response.status().is_success() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    parts.headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_str(&format!("max-age={}, immutable", max_age_sec))
            .unwrap_or(HeaderValue::from_static("no-cache")),
    );

    Response::from_parts(parts, body)
}

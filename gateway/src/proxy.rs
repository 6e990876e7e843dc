//! Request proxying: forward method, rewritten path, query, headers (less
//! hop-by-hop) and body; retry on timeout or transport error; `502` with
//! the last error on exhaustion.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::config::{match_route, rewrite_path};
use crate::GatewayState;

const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "upgrade",
    "keep-alive",
    "proxy-authorization",
    "te",
];

pub async fn proxy_handler(State(state): State<Arc<GatewayState>>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);

    let Some(rule) = match_route(&state.config.routes, &path) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "no route for path" })),
        )
            .into_response();
    };
    let Some(service) = state.registry.get_service(&rule.service_name) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": format!("Service '{}' not found", rule.service_name) })),
        )
            .into_response();
    };

    let mut target = format!("{}{}", service.base_url, rewrite_path(rule, &path));
    if let Some(query) = &query {
        target.push('?');
        target.push_str(query);
    }

    let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in request.headers() {
        let name = name.as_str();
        if HOP_BY_HOP.contains(&name) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, value);
        }
    }

    let body = match to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "detail": format!("unreadable request body: {e}") })),
            )
                .into_response();
        }
    };

    let mut last_error = String::new();
    for attempt in 1..=service.retry_count {
        let result = state
            .http
            .request(method.clone(), &target)
            .headers(headers.clone())
            .body(body.clone())
            .timeout(service.timeout)
            .send()
            .await;

        match result {
            Ok(upstream) => return forward_response(upstream).await,
            Err(e) if e.is_timeout() => {
                last_error = format!("timeout after {:?}", service.timeout);
                tracing::warn!(
                    service = %service.name,
                    attempt,
                    retries = service.retry_count,
                    "proxy timeout"
                );
            }
            Err(e) => {
                last_error = e.to_string();
                tracing::warn!(
                    service = %service.name,
                    attempt,
                    retries = service.retry_count,
                    error = %e,
                    "proxy request error"
                );
            }
        }
    }

    (
        StatusCode::BAD_GATEWAY,
        Json(json!({
            "detail": format!(
                "Failed to proxy request to '{}': {last_error}",
                service.name
            )
        })),
    )
        .into_response()
}

async fn forward_response(upstream: reqwest::Response) -> Response {
    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in upstream.headers() {
        let name = name.as_str();
        if HOP_BY_HOP.contains(&name) {
            continue;
        }
        builder = builder.header(name, value.as_bytes());
    }
    match upstream.bytes().await {
        Ok(bytes) => builder
            .body(Body::from(bytes))
            .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response()),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "detail": format!("failed to read upstream body: {e}") })),
        )
            .into_response(),
    }
}

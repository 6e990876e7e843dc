//! Idempotency middleware: at-most-one effect per `(key, method, path)`.
//!
//! First request with a key atomically claims it as processing (short TTL);
//! a successful 2xx JSON response is cached (long TTL) and replayed
//! verbatim for duplicates; failures release the key so the client can
//! retry. A duplicate arriving while the original is in flight gets `409`.
//!
//! The map-backed store keeps the protocol; a shared backend slots in for
//! multi-node deployments.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use serde_json::json;

use crate::app::AppState;

#[derive(Clone)]
enum CacheState {
    Processing,
    Cached {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
}

struct Entry {
    state: CacheState,
    expires_at: Instant,
}

/// Outcome of the atomic claim.
pub enum BeginOutcome {
    /// We own processing for this key.
    Acquired,
    /// Another request with this key is still in flight.
    Processing,
    /// A finished response exists; replay it verbatim.
    Replay {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
}

pub struct IdempotencyStore {
    entries: DashMap<String, Entry>,
    processing_ttl: Duration,
    cached_ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(processing_ttl: Duration, cached_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            processing_ttl,
            cached_ttl,
        }
    }

    /// Atomic set-if-absent of the processing marker. Expired entries are
    /// treated as absent.
    pub fn try_begin(&self, key: &str) -> BeginOutcome {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Entry {
                    state: CacheState::Processing,
                    expires_at: now + self.processing_ttl,
                });
                BeginOutcome::Acquired
            }
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.expires_at <= now {
                    entry.state = CacheState::Processing;
                    entry.expires_at = now + self.processing_ttl;
                    return BeginOutcome::Acquired;
                }
                match &entry.state {
                    CacheState::Processing => BeginOutcome::Processing,
                    CacheState::Cached {
                        status,
                        headers,
                        body,
                    } => BeginOutcome::Replay {
                        status: *status,
                        headers: headers.clone(),
                        body: body.clone(),
                    },
                }
            }
        }
    }

    /// Replaces the processing marker with the cached response.
    pub fn complete(&self, key: &str, status: u16, headers: Vec<(String, String)>, body: Vec<u8>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                state: CacheState::Cached {
                    status,
                    headers,
                    body,
                },
                expires_at: Instant::now() + self.cached_ttl,
            },
        );
    }

    /// Deletes the key so the client may retry after a failure.
    pub fn release(&self, key: &str) {
        self.entries.remove(key);
    }
}

fn cacheable_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| {
            let name = name.as_str();
            !matches!(
                name,
                "connection" | "transfer-encoding" | "content-length" | "date"
            )
        })
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

fn replay_response(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK));
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Axum middleware applying the protocol to requests bearing
/// `Idempotency-Key`.
pub async fn idempotency_layer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(key) = request
        .headers()
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return next.run(request).await;
    };

    let cache_key = format!(
        "{key}:{}:{}",
        request.method(),
        request.uri().path()
    );

    match state.idempotency.try_begin(&cache_key) {
        BeginOutcome::Processing => (
            StatusCode::CONFLICT,
            Json(json!({
                "detail": "Request with this Idempotency-Key is currently being processed"
            })),
        )
            .into_response(),
        BeginOutcome::Replay {
            status,
            headers,
            body,
        } => {
            tracing::debug!(%cache_key, "replaying cached idempotent response");
            replay_response(status, headers, body)
        }
        BeginOutcome::Acquired => {
            let response = next.run(request).await;
            let status = response.status();
            if !status.is_success() {
                state.idempotency.release(&cache_key);
                return response;
            }

            let (parts, body) = response.into_parts();
            let bytes = match to_bytes(body, usize::MAX).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    state.idempotency.release(&cache_key);
                    tracing::error!(error = %e, "failed to buffer response for idempotency cache");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            };

            // Only JSON responses are cached; anything else releases the
            // key rather than replaying bytes we cannot vouch for.
            if serde_json::from_slice::<serde_json::Value>(&bytes).is_ok() {
                state.idempotency.complete(
                    &cache_key,
                    status.as_u16(),
                    cacheable_headers(&parts.headers),
                    bytes.to_vec(),
                );
            } else {
                state.idempotency.release(&cache_key);
            }

            Response::from_parts(parts, Body::from(bytes))
        }
    }
}

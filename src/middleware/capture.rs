use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;

use crate::core::server::AppState;
use crate::models::{EventMessage, RequestRecord};

/// Capture layer wrapped around every route: times the request, runs the
/// routed handler, then appends a history record and publishes it.
///
/// The record keeps the full request URI (query string included) even
/// though endpoint lookup uses only the path.
pub async fn capture_request(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next<Body>,
) -> Response {
    let started_at = Utc::now();
    let start = Instant::now();
    let method = request.method().to_string();
    let uri = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;

    let record = RequestRecord {
        timestamp: started_at,
        method,
        path: uri,
        status_code: response.status().as_u16(),
        duration_ms: start.elapsed().as_millis() as u64,
        remote_addr: peer.to_string(),
    };

    tracing::info!(
        method = %record.method,
        uri = %record.path,
        status = record.status_code,
        elapsed_ms = record.duration_ms,
        peer = %record.remote_addr,
        "request completed"
    );

    state.history.append(record.clone());
    state.hub.broadcast(EventMessage::request_log(&record));

    response
}

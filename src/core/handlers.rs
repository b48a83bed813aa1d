use std::collections::HashMap;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use crate::core::server::AppState;
use crate::error::ServerError;
use crate::models::{Config, EndpointConfig};

/// Body of `POST /config`
#[derive(Debug, Deserialize)]
struct EndpointUpsert {
    path: String,
    config: EndpointConfig,
}

/// `/config` entry point: method switch over the configuration operations
pub async fn config_entry(
    State(state): State<AppState>,
    method: Method,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let start = Instant::now();

    let result = if method == Method::GET {
        get_config(&state).await
    } else if method == Method::PUT {
        update_config(&state, &body).await
    } else if method == Method::POST {
        add_endpoint(&state, &body).await
    } else if method == Method::DELETE {
        remove_endpoint(&state, &params).await
    } else {
        Err(ServerError::MethodNotAllowed)
    };

    let response = result.unwrap_or_else(|e| e.into_response());
    state
        .stats
        .record("/config", start.elapsed(), response.status().as_u16());
    response
}

async fn get_config(state: &AppState) -> Result<Response, ServerError> {
    let config = state.store.snapshot().await.ok_or(ServerError::NotLoaded)?;
    Ok(Json(config).into_response())
}

async fn update_config(state: &AppState, body: &Bytes) -> Result<Response, ServerError> {
    let new_config: Config =
        serde_json::from_slice(body).map_err(|e| ServerError::Decode(e.to_string()))?;
    state.store.replace(new_config).await?;

    Ok(Json(json!({"status": "success", "message": "Configuration updated"})).into_response())
}

async fn add_endpoint(state: &AppState, body: &Bytes) -> Result<Response, ServerError> {
    let request: EndpointUpsert =
        serde_json::from_slice(body).map_err(|e| ServerError::Decode(e.to_string()))?;
    if request.path.is_empty() {
        return Err(ServerError::invalid_config("path", "cannot be empty"));
    }
    state
        .store
        .upsert_endpoint(&request.path, request.config)
        .await?;

    Ok(Json(json!({"status": "success", "message": "Endpoint added"})).into_response())
}

async fn remove_endpoint(
    state: &AppState,
    params: &HashMap<String, String>,
) -> Result<Response, ServerError> {
    let path = params
        .get("path")
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ServerError::invalid_config("path", "query parameter is required"))?;
    state.store.delete_endpoint(path).await?;

    Ok(Json(json!({"status": "success", "message": "Endpoint removed"})).into_response())
}

/// `GET /stats`: snapshot of the statistics registry.
///
/// Wrong methods answer 405 and are still counted against `/stats`.
pub async fn stats(State(state): State<AppState>, method: Method) -> Response {
    let start = Instant::now();

    let result = if method == Method::GET {
        Ok(Json(state.stats.snapshot()).into_response())
    } else {
        Err(ServerError::MethodNotAllowed)
    };

    let response = result.unwrap_or_else(|e| e.into_response());
    state
        .stats
        .record("/stats", start.elapsed(), response.status().as_u16());
    response
}

/// `GET /requestlog`: the request history, newest first.
///
/// Wrong methods answer 405 and are still counted against `/requestlog`.
pub async fn request_log(State(state): State<AppState>, method: Method) -> Response {
    let start = Instant::now();

    let result = if method == Method::GET {
        Ok(Json(state.history.snapshot()).into_response())
    } else {
        Err(ServerError::MethodNotAllowed)
    };

    let response = result.unwrap_or_else(|e| e.into_response());
    state
        .stats
        .record("/requestlog", start.elapsed(), response.status().as_u16());
    response
}

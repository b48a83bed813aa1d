use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::core::server::AppState;
use crate::error::ServerError;
use crate::models::EndpointConfig;

/// Landing page written to a freshly created static directory
const DEFAULT_INDEX: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>faultline</title>
    <style>
        body { font-family: sans-serif; margin: 40px; max-width: 800px; }
        .endpoint { background: #f5f5f5; padding: 10px; margin: 10px 0; border-radius: 5px; }
    </style>
</head>
<body>
    <h1>faultline</h1>
    <p>The fault-injection server is running.</p>

    <h2>Control plane</h2>
    <div class="endpoint"><strong>GET /config</strong> - current configuration</div>
    <div class="endpoint"><strong>PUT /config</strong> - replace configuration</div>
    <div class="endpoint"><strong>GET /stats</strong> - server statistics</div>
    <div class="endpoint"><strong>GET /requestlog</strong> - recent requests</div>
    <div class="endpoint"><strong>GET /ws</strong> - event stream</div>

    <h2>Seed endpoints</h2>
    <div class="endpoint"><strong>GET <a href="/api/error">/api/error</a></strong> - always 500</div>
    <div class="endpoint"><strong>GET <a href="/api/delay">/api/delay</a></strong> - 2 second delay</div>
    <div class="endpoint"><strong>GET <a href="/api/flaky">/api/flaky</a></strong> - error every 3rd request</div>
</body>
</html>
"#;

/// Fallback handler: resolve the request path against the endpoint table,
/// evaluate the configured behavior, or fall through to static files.
///
/// Lookup is by exact equality on the URL path alone; the query string is
/// never part of the key.
pub async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let path = request.uri().path().to_string();

    let config = match state.store.snapshot().await {
        Some(config) => config,
        None => {
            let response = ServerError::NotLoaded.into_response();
            state
                .stats
                .record(&path, start.elapsed(), response.status().as_u16());
            return response;
        }
    };

    let response = match config.endpoints.get(&path) {
        Some(endpoint) => evaluate_behavior(&state, &path, endpoint).await,
        None => serve_static(&path, &config.server.static_dir).await,
    };

    state
        .stats
        .record(&path, start.elapsed(), response.status().as_u16());
    response
}

/// Produce the synthetic response for a configured endpoint
async fn evaluate_behavior(state: &AppState, path: &str, endpoint: &EndpointConfig) -> Response {
    match endpoint {
        EndpointConfig::Error {
            status_code,
            message,
        } => {
            let status = error_status(*status_code);
            let body = json!({"error": message.clone().unwrap_or_default()});
            (status, Json(body)).into_response()
        }

        EndpointConfig::Delay { delay_ms, response } => {
            if *delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
            }
            let body = response.clone().unwrap_or_else(|| json!({}));
            (StatusCode::OK, Json(body)).into_response()
        }

        EndpointConfig::ConditionalError {
            error_every_n,
            status_code,
            success_response,
        } => {
            // One atomic fetch_add decides the branch; hit k*N is always
            // the error one
            let hit = state.stats.increment_conditional(path);
            if hit % *error_every_n == 0 {
                let body = json!({"error": "Conditional error triggered"});
                (error_status(*status_code), Json(body)).into_response()
            } else {
                let body = success_response.clone().unwrap_or_else(|| json!({}));
                (StatusCode::OK, Json(body)).into_response()
            }
        }
    }
}

fn error_status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Serve a file from the static root, creating the root and a landing page
/// on first access
async fn serve_static(request_path: &str, static_dir: &str) -> Response {
    if let Err(e) = ensure_static_dir(static_dir).await {
        tracing::error!(error = %e, dir = %static_dir, "failed to prepare static directory");
        return ServerError::Internal("static directory unavailable".to_string()).into_response();
    }

    let file_path = match resolve_static_path(Path::new(static_dir), request_path) {
        Ok(path) => path,
        Err(e) => return e.into_response(),
    };

    match tokio::fs::read(&file_path).await {
        Ok(contents) => {
            let mime = mime_guess::from_path(&file_path).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.as_ref())], contents).into_response()
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "404 file not found").into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %file_path.display(), "failed to read static file");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to read file").into_response()
        }
    }
}

/// Map a request path to a file inside the static root.
///
/// `/` means `/index.html`. The path is normalized lexically; anything that
/// would climb above the root is rejected with `Forbidden`.
fn resolve_static_path(root: &Path, request_path: &str) -> Result<PathBuf, ServerError> {
    let relative = if request_path == "/" {
        "/index.html"
    } else {
        request_path
    };

    let mut clean = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::ParentDir => {
                if !clean.pop() {
                    return Err(ServerError::Forbidden(format!(
                        "path escapes static root: {}",
                        request_path
                    )));
                }
            }
            Component::RootDir | Component::CurDir => {}
            Component::Prefix(_) => {
                return Err(ServerError::Forbidden(format!(
                    "invalid path: {}",
                    request_path
                )))
            }
        }
    }

    Ok(root.join(clean))
}

/// Create the static root and its landing page if either is missing
async fn ensure_static_dir(static_dir: &str) -> Result<(), ServerError> {
    let root = Path::new(static_dir);
    if !root.exists() {
        tokio::fs::create_dir_all(root).await?;
        tracing::info!(dir = %root.display(), "created static directory");
    }

    let index = root.join("index.html");
    if !index.exists() {
        tokio::fs::write(&index, DEFAULT_INDEX).await?;
        tracing::info!(path = %index.display(), "wrote default landing page");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_path_maps_to_index_html() {
        let resolved = resolve_static_path(Path::new("./static"), "/").unwrap();
        assert_eq!(resolved, Path::new("./static").join("index.html"));
    }

    #[test]
    fn nested_paths_stay_inside_the_root() {
        let resolved = resolve_static_path(Path::new("/srv/www"), "/css/site.css").unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/www/css/site.css"));
    }

    #[test]
    fn parent_components_collapse_within_the_root() {
        let resolved = resolve_static_path(Path::new("/srv/www"), "/a/../b.html").unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/www/b.html"));
    }

    #[test]
    fn traversal_above_the_root_is_forbidden() {
        let err = resolve_static_path(Path::new("/srv/www"), "/../etc/passwd").unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));

        let err = resolve_static_path(Path::new("/srv/www"), "/a/../../etc/passwd").unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
    }

    #[tokio::test]
    async fn ensure_static_dir_writes_landing_page_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("static");
        let root_str = root.to_str().unwrap();

        ensure_static_dir(root_str).await.unwrap();
        let index = root.join("index.html");
        assert!(index.exists());

        // A user-provided page is not overwritten
        std::fs::write(&index, "custom").unwrap();
        ensure_static_dir(root_str).await.unwrap();
        assert_eq!(std::fs::read_to_string(&index).unwrap(), "custom");
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{any, get};
use axum::Router;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::watcher::ConfigWatcher;
use crate::config::ConfigStore;
use crate::core::{dispatch, handlers, ws};
use crate::error::ServerError;
use crate::history::RequestHistory;
use crate::middleware::capture;
use crate::observer::ObserverHub;
use crate::stats::StatsRegistry;

/// In-flight requests get this long to finish after `stop()` before the
/// listener is closed hard.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared handles threaded through every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub stats: Arc<StatsRegistry>,
    pub history: Arc<RequestHistory>,
    pub hub: Arc<ObserverHub>,
}

/// Listener state that exists only while the server runs
struct RunState {
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    local_addr: Option<SocketAddr>,
}

/// The fault-injection server: owns the config store, statistics, request
/// history, observer hub, and the hot-reload watcher, and drives the
/// listener lifecycle.
pub struct FaultServer {
    state: AppState,
    watcher: ConfigWatcher,
    run_state: Mutex<RunState>,
}

impl FaultServer {
    /// Create a server bound to a config file path. Nothing happens until
    /// [`FaultServer::start`].
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        let hub = Arc::new(ObserverHub::new());
        let store = Arc::new(ConfigStore::new(config_path, hub.clone()));
        let state = AppState {
            store: store.clone(),
            stats: Arc::new(StatsRegistry::new()),
            history: Arc::new(RequestHistory::default()),
            hub,
        };

        Self {
            state,
            watcher: ConfigWatcher::new(store),
            run_state: Mutex::new(RunState {
                handle: None,
                shutdown_tx: None,
                local_addr: None,
            }),
        }
    }

    /// Shared component handles, mainly for tests and embedding
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Load the config, bind the listener, and start the watcher.
    ///
    /// Starting an already-running server is an error. A watcher start
    /// failure disables hot reload but does not fail startup.
    pub async fn start(&self) -> Result<(), ServerError> {
        let mut run_state = self.run_state.lock().await;
        if run_state.handle.is_some() {
            return Err(ServerError::Internal("server is already running".to_string()));
        }

        self.state.store.load().await?;
        let config = self.state.store.snapshot().await.ok_or(ServerError::NotLoaded)?;

        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e| {
                ServerError::invalid_config("host", format!("invalid listen address: {}", e))
            })?;

        let app = build_router(self.state.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server = axum::Server::try_bind(&addr)
            .map_err(|e| ServerError::Internal(format!("failed to bind {}: {}", addr, e)))?
            .serve(app.into_make_service_with_connect_info::<SocketAddr>());
        let local_addr = server.local_addr();

        let graceful = server.with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });

        let handle = tokio::spawn(async move {
            if let Err(e) = graceful.await {
                tracing::error!(error = %e, "server error");
            }
        });

        if let Err(e) = self.watcher.start() {
            tracing::warn!(error = %e, "failed to start config watcher; hot reload disabled");
        }

        run_state.handle = Some(handle);
        run_state.shutdown_tx = Some(shutdown_tx);
        run_state.local_addr = Some(local_addr);

        tracing::info!(addr = %local_addr, "server started");
        Ok(())
    }

    /// Stop the watcher, cancel subscribers, and shut the listener down.
    ///
    /// In-flight requests get [`SHUTDOWN_GRACE`] to finish, then the
    /// listener task is aborted. Stopping a stopped server is a no-op.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut run_state = self.run_state.lock().await;
        let handle = match run_state.handle.take() {
            Some(handle) => handle,
            None => return Ok(()),
        };
        run_state.local_addr = None;

        self.watcher.stop();
        self.state.hub.shutdown();

        if let Some(tx) = run_state.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let abort = handle.abort_handle();
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => tracing::info!("server stopped"),
            Ok(Err(e)) => {
                return Err(ServerError::Internal(format!("server task failed: {}", e)))
            }
            Err(_) => {
                tracing::warn!("grace period expired, closing listener hard");
                abort.abort();
            }
        }
        Ok(())
    }

    /// Whether the listener is currently running
    pub async fn is_running(&self) -> bool {
        self.run_state.lock().await.handle.is_some()
    }

    /// Address the listener is bound to, while running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.run_state.lock().await.local_addr
    }
}

/// Control-plane routes, the dispatch fallback, and the capture layer
fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/config", any(handlers::config_entry))
        .route("/stats", any(handlers::stats))
        .route("/requestlog", any(handlers::request_log))
        .route("/ws", get(ws::ws_entry))
        .fallback(dispatch::dispatch)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            capture::capture_request,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::RwLock;

use crate::error::ServerError;
use crate::models::{Config, EndpointConfig, EventMessage};
use crate::observer::ObserverHub;

pub mod watcher;

/// Owns the authoritative [`Config`]: loads it from disk, validates every
/// mutation, persists atomically, and publishes `config_updated` events.
///
/// Single-writer, many-reader: mutators hold the write lock across
/// validate -> persist -> swap -> publish, readers clone a snapshot.
pub struct ConfigStore {
    path: PathBuf,
    config: RwLock<Option<Config>>,
    hub: Arc<ObserverHub>,
}

impl ConfigStore {
    /// Create a store bound to a config file path. Nothing is read until
    /// [`ConfigStore::load`] is called.
    pub fn new(path: impl Into<PathBuf>, hub: Arc<ObserverHub>) -> Self {
        Self {
            path: path.into(),
            config: RwLock::new(None),
            hub,
        }
    }

    /// Path of the backing config file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration from disk. If the file does not exist, a
    /// default config is written there and adopted instead.
    pub async fn load(&self) -> Result<(), ServerError> {
        let mut guard = self.config.write().await;

        let config = if self.path.exists() {
            let data = tokio::fs::read(&self.path).await?;
            let config: Config =
                serde_json::from_slice(&data).map_err(|e| ServerError::Decode(e.to_string()))?;
            validate_config(&config)?;
            config
        } else {
            let config = default_config();
            self.persist(&config).await?;
            tracing::info!(path = %self.path.display(), "wrote default configuration");
            config
        };

        self.adopt(&mut guard, config);
        Ok(())
    }

    /// Deep-copied snapshot of the live config, or `None` before first load
    pub async fn snapshot(&self) -> Option<Config> {
        self.config.read().await.clone()
    }

    /// Validate, persist, and adopt a full replacement config.
    ///
    /// All-or-nothing: a validation or persist failure leaves both the
    /// in-memory config and the file untouched.
    pub async fn replace(&self, new_config: Config) -> Result<(), ServerError> {
        validate_config(&new_config)?;

        let mut guard = self.config.write().await;
        self.persist(&new_config).await?;
        self.adopt(&mut guard, new_config);
        Ok(())
    }

    /// Insert or overwrite a single endpoint, keeping the rest of the table
    pub async fn upsert_endpoint(
        &self,
        path: &str,
        endpoint: EndpointConfig,
    ) -> Result<(), ServerError> {
        if path.is_empty() {
            return Err(ServerError::invalid_config("path", "cannot be empty"));
        }
        validate_endpoint(path, &endpoint)?;

        let mut guard = self.config.write().await;
        let mut updated = guard.clone().ok_or(ServerError::NotLoaded)?;
        updated.endpoints.insert(path.to_string(), endpoint);

        self.persist(&updated).await?;
        self.adopt(&mut guard, updated);
        Ok(())
    }

    /// Remove an endpoint. Removing an absent path succeeds idempotently.
    pub async fn delete_endpoint(&self, path: &str) -> Result<(), ServerError> {
        let mut guard = self.config.write().await;
        let mut updated = guard.clone().ok_or(ServerError::NotLoaded)?;
        updated.endpoints.remove(path);

        self.persist(&updated).await?;
        self.adopt(&mut guard, updated);
        Ok(())
    }

    /// Swap the live config and notify subscribers. Callers hold the write
    /// lock and have already validated and persisted.
    fn adopt(&self, guard: &mut Option<Config>, config: Config) {
        if let Some(old) = guard.as_ref() {
            if old.server.host != config.server.host || old.server.port != config.server.port {
                tracing::warn!(
                    old = %format!("{}:{}", old.server.host, old.server.port),
                    new = %format!("{}:{}", config.server.host, config.server.port),
                    "listen address changed in reloaded config; restart required, keeping current listener"
                );
            }
        }

        self.hub.broadcast(EventMessage::config_updated(&config));
        *guard = Some(config);
    }

    /// Atomic persist: write a temp file next to the target, then rename
    async fn persist(&self, config: &Config) -> Result<(), ServerError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        let data = serde_json::to_vec_pretty(config)
            .map_err(|e| ServerError::Internal(format!("failed to encode config: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// The configuration adopted when no config file exists yet: three seed
/// endpoints exercising each behavior kind.
pub fn default_config() -> Config {
    let mut config = Config::default();
    config.endpoints.insert(
        "/api/error".to_string(),
        EndpointConfig::Error {
            status_code: 500,
            message: Some("Internal Server Error".to_string()),
        },
    );
    config.endpoints.insert(
        "/api/delay".to_string(),
        EndpointConfig::Delay {
            delay_ms: 2000,
            response: Some(json!({"message": "Delayed response"})),
        },
    );
    config.endpoints.insert(
        "/api/flaky".to_string(),
        EndpointConfig::ConditionalError {
            error_every_n: 3,
            status_code: 503,
            success_response: Some(json!({"status": "ok"})),
        },
    );
    config
}

/// Validate a full config: listener settings plus every table entry
pub fn validate_config(config: &Config) -> Result<(), ServerError> {
    if config.server.port == 0 {
        return Err(ServerError::invalid_config(
            "port",
            "must be between 1 and 65535",
        ));
    }
    if config.server.host.is_empty() {
        return Err(ServerError::invalid_config("host", "cannot be empty"));
    }
    if config.server.static_dir.is_empty() {
        return Err(ServerError::invalid_config(
            "static_dir",
            "cannot be empty",
        ));
    }

    for (path, endpoint) in &config.endpoints {
        if path.is_empty() {
            return Err(ServerError::invalid_config(
                "endpoints",
                "endpoint path cannot be empty",
            ));
        }
        validate_endpoint(path, endpoint)?;
    }

    Ok(())
}

/// Validate a single endpoint behavior per its kind
pub fn validate_endpoint(path: &str, endpoint: &EndpointConfig) -> Result<(), ServerError> {
    match endpoint {
        EndpointConfig::Error { status_code, .. } => {
            if !(400..=599).contains(status_code) {
                return Err(ServerError::invalid_config(
                    format!("endpoints[{}].status_code", path),
                    format!("{} is not an error status (400-599)", status_code),
                ));
            }
        }
        EndpointConfig::Delay { .. } => {}
        EndpointConfig::ConditionalError {
            error_every_n,
            status_code,
            ..
        } => {
            if *error_every_n < 1 {
                return Err(ServerError::invalid_config(
                    format!("endpoints[{}].error_every_n", path),
                    "must be at least 1",
                ));
            }
            if !(400..=599).contains(status_code) {
                return Err(ServerError::invalid_config(
                    format!("endpoints[{}].status_code", path),
                    format!("{} is not an error status (400-599)", status_code),
                ));
            }
        }
    }
    Ok(())
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Host to bind to
    pub host: String,

    /// Root directory for static file fallback
    pub static_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            static_dir: "./static".to_string(),
        }
    }
}

/// Behavior bound to an endpoint path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndpointConfig {
    /// Always answer with a fixed error status
    Error {
        status_code: u16,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Answer 200 after a fixed delay
    Delay {
        delay_ms: u64,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },

    /// Answer the error status on every Nth hit, 200 otherwise
    ConditionalError {
        error_every_n: u64,
        status_code: u16,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        success_response: Option<Value>,
    },
}

/// Complete server configuration: listener settings plus the endpoint table.
///
/// The endpoint table maps URL paths (no query string) to behaviors. Keys are
/// unique and serialize in lexicographic order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,

    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointConfig>,
}

/// A completed request as seen by the capture layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Wall-clock time the request entered dispatch
    pub timestamp: DateTime<Utc>,

    /// HTTP method
    pub method: String,

    /// Full request URI including the query string
    pub path: String,

    /// Final status code written to the client
    pub status_code: u16,

    /// Elapsed time in whole milliseconds
    pub duration_ms: u64,

    /// Peer address as observed
    pub remote_addr: String,
}

/// Aggregated statistics for one endpoint path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStats {
    pub path: String,
    pub request_count: u64,
    pub error_count: u64,
    pub total_time_ms: u64,
    pub min_time_ms: u64,
    pub max_time_ms: u64,

    /// Status code -> number of responses with that code
    pub status_codes: BTreeMap<u16, u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_request: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_request: Option<DateTime<Utc>>,

    /// Monotonic hit counter used by conditional_error endpoints
    pub conditional_count: u64,
}

/// Global statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    pub start_time: DateTime<Utc>,
    pub total_requests: u64,
    pub total_errors: u64,
    pub endpoints: BTreeMap<String, EndpointStats>,
}

/// Event kinds carried on the observer channel and the WebSocket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Config snapshot (sent on connect and on request)
    Config,
    /// Stats snapshot (sent on connect and on request)
    Stats,
    /// The live config was replaced
    ConfigUpdated,
    /// A request completed
    RequestLog,
}

/// Message envelope pushed to subscribers and exchanged over `/ws`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl EventMessage {
    fn new(kind: EventKind, data: impl Serialize) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    /// Config snapshot for a newly connected subscriber
    pub fn config_snapshot(config: &Config) -> Self {
        Self::new(EventKind::Config, config)
    }

    /// Stats snapshot for a newly connected subscriber
    pub fn stats_snapshot(stats: &ServerStats) -> Self {
        Self::new(EventKind::Stats, stats)
    }

    /// Published after every successful config adoption
    pub fn config_updated(config: &Config) -> Self {
        Self::new(EventKind::ConfigUpdated, config)
    }

    /// Published after every completed request
    pub fn request_log(record: &RequestRecord) -> Self {
        Self::new(EventKind::RequestLog, record)
    }
}

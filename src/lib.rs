// Programmable HTTP fault-injection and observability server

pub mod config;
pub mod core;
pub mod error;
pub mod history;
pub mod middleware;
pub mod models;
pub mod observer;
pub mod stats;

// Re-export commonly used types
pub use crate::core::server::{AppState, FaultServer};
pub use config::ConfigStore;
pub use error::ServerError;
pub use history::RequestHistory;
pub use models::{Config, EndpointConfig, EventKind, EventMessage, RequestRecord, ServerConfig};
pub use observer::ObserverHub;
pub use stats::StatsRegistry;

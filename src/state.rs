//! Server state management.
//!
//! Holds the database handle, runtime configuration, and the two in-process
//! brokers: one waking shipment streams, one fanning out conversation events.

use std::time::Duration;

use crate::broker::Broker;
use crate::conversation::PushEvent;
use crate::storage::Database;

/// Default wall-clock budget of one shipment stream connection.
const DEFAULT_STREAM_BUDGET_SECS: u64 = 30;

/// Default interval between shipment stream polls.
const DEFAULT_STREAM_POLL_MS: u64 = 800;

/// Default reconnect delay advertised to stream clients.
const DEFAULT_STREAM_RETRY_MS: u64 = 3000;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database_path: String,
    pub stream_budget: Duration,
    pub stream_poll_interval: Duration,
    pub stream_retry: Duration,
    /// Public URL prefix of the blob store serving profile pictures.
    pub storage_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_path: "shipdesk.db".to_string(),
            stream_budget: Duration::from_secs(DEFAULT_STREAM_BUDGET_SECS),
            stream_poll_interval: Duration::from_millis(DEFAULT_STREAM_POLL_MS),
            stream_retry: Duration::from_millis(DEFAULT_STREAM_RETRY_MS),
            storage_url: "/storage".to_string(),
        }
    }
}

impl ServerConfig {
    /// Public URL of a stored blob path.
    pub fn storage_url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.storage_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,

    pub config: ServerConfig,

    /// Shipment id → wake-ups carrying the id of the appended message.
    pub shipment_notifier: Broker<i64>,

    /// Conversation id → push events for WebSocket subscribers.
    pub conversation_hub: Broker<PushEvent>,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        Self {
            db,
            config,
            shipment_notifier: Broker::new(),
            conversation_hub: Broker::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.stream_budget, Duration::from_secs(30));
        assert_eq!(config.stream_poll_interval, Duration::from_millis(800));
        assert_eq!(config.stream_retry, Duration::from_millis(3000));
    }

    #[test]
    fn test_storage_url_joins_once() {
        let mut config = ServerConfig::default();
        assert_eq!(config.storage_url_for("avatars/a.png"), "/storage/avatars/a.png");
        config.storage_url = "https://cdn.example.com/files/".into();
        assert_eq!(
            config.storage_url_for("/avatars/a.png"),
            "https://cdn.example.com/files/avatars/a.png"
        );
    }

    #[test]
    fn test_state_creation() {
        let state = AppState::new(Database::open(None).unwrap(), ServerConfig::default());
        assert_eq!(state.shipment_notifier.topic_count(), 0);
        assert_eq!(state.conversation_hub.topic_count(), 0);
    }
}

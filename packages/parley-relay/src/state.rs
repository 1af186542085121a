//! Server state and configuration.
//!
//! The session registry is the only cross-connection state; everything
//! else here is read-only after start-up.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::registry::SessionRegistry;

/// Default cap on a single WebSocket frame (SDP blobs are a few KiB).
const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted client frame, in bytes.
    pub max_message_bytes: usize,
    /// Tell the sender when an envelope's recipient is not connected,
    /// instead of dropping it silently.
    pub notify_unavailable: bool,
    /// Close a connection once a newer one registers the same user.
    pub close_superseded: bool,
    /// Broadcast online/offline presence to every other registered client.
    pub broadcast_presence: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            notify_unavailable: true,
            close_superseded: true,
            broadcast_presence: false,
        }
    }
}

/// Shared server state.
#[derive(Clone)]
pub struct RelayState {
    /// User id ↔ connection map.
    pub registry: Arc<SessionRegistry>,

    /// Server configuration.
    pub config: RelayConfig,

    /// When this process started serving.
    pub started_at: DateTime<Utc>,
}

impl RelayState {
    /// Create a new relay state with the given configuration.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            config,
            started_at: Utc::now(),
        }
    }

    pub fn online_count(&self) -> usize {
        self.registry.online_count()
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

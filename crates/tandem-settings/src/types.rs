//! Settings types.

use serde::{Deserialize, Serialize};

/// Batches longer than this are replaced by one compacted broadcast event.
pub const BROADCAST_COMPACT_THRESHOLD: usize = 10_000;

/// Upper bound for one outgoing frame produced by the chunked send helper (1 MiB).
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TandemSettings {
    /// Per-session behaviour.
    pub session: SessionSettings,
    /// WebSocket host.
    pub server: ServerSettings,
    /// Token decoding.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Per-session behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Batch length above which broadcasts are compacted to a class list.
    pub broadcast_compact_threshold: usize,
    /// Maximum bytes per outgoing frame for chunked responses.
    pub max_payload_bytes: usize,
    /// How often `current` statistics are folded into the window.
    pub stats_roll_interval_secs: u64,
    /// Length of the trailing statistics window.
    pub stats_window_secs: u64,
    /// Initial binary-mode flag of new sessions.
    pub default_binary_mode: bool,
    /// Initial compression flag of new sessions.
    pub default_compression: bool,
    /// Requests running longer than this are logged as slow.
    pub slow_request_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            broadcast_compact_threshold: BROADCAST_COMPACT_THRESHOLD,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            stats_roll_interval_secs: 60,
            stats_window_secs: 300,
            default_binary_mode: false,
            default_compression: true,
            slow_request_ms: 5_000,
        }
    }
}

/// WebSocket host settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` = auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Heartbeat timeout in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Max incoming WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per connection.
    pub send_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1_000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 16 * 1024 * 1024,
            send_queue_capacity: 1_024,
        }
    }
}

/// Token decoding settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 secret used to verify client tokens.
    pub secret: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            secret: "secret".into(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

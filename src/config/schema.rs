//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for both tiers.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the CYAN server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Client-facing edge tier.
    pub edge: EdgeConfig,

    /// Token-keyed session tier.
    pub session: SessionConfig,

    /// Grammar settings.
    pub protocol: ProtocolConfig,

    /// Resource handler settings.
    pub handler: HandlerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Edge tier configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Bind address for client connections (e.g., "0.0.0.0:12345").
    pub bind_address: String,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,

    /// How long a single client read may be awaited, in seconds.
    pub idle_read_timeout_secs: u64,

    /// Size of each client read.
    pub read_buffer_bytes: usize,

    /// Address of the session tier.
    pub session_address: String,

    /// Timeout for opening a link to the session tier, in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:12345".to_string(),
            max_connections: 10_000,
            idle_read_timeout_secs: 300,
            read_buffer_bytes: 1024,
            session_address: "127.0.0.1:12346".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

/// Session tier configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bind address for edge links. Must be a loopback address.
    pub bind_address: String,

    /// Maximum concurrent edge links.
    pub max_connections: usize,

    /// Lifetime of a session from creation, in seconds. Never renewed.
    pub ttl_secs: u64,

    /// Time allowed for the identification message, in seconds.
    pub ident_timeout_secs: u64,

    /// Reserved user id that may not open a session.
    pub anonymous_user: String,

    /// Optional cap on inbound frame size. Unset means no cap.
    pub max_frame_bytes: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:12346".to_string(),
            max_connections: 10_000,
            ttl_secs: 24 * 60 * 60,
            ident_timeout_secs: 10,
            anonymous_user: "u000000".to_string(),
            max_frame_bytes: None,
        }
    }
}

/// Protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Highest accepted `CYAN <version>` token (compared byte-wise).
    pub max_version: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_version: "0.1".to_string(),
        }
    }
}

/// Resource handler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Targets routed to the resource handler. Everything else gets a
    /// placeholder answer from the session actor.
    pub privileged_targets: Vec<String>,

    /// Sender id stamped on placeholder `BIN` responses.
    pub placeholder_sender: String,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            privileged_targets: vec!["/login".to_string()],
            placeholder_sender: "u000000".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Single-line log output.
    pub compact_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            compact_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

//! Client-facing edge tier.
//!
//! # Data Flow
//! ```text
//! Client TCP connection
//!     → net::Listener (connection limit)
//!     → ConnectionActor (parse, forward, reply)
//!     → SessionLink per (USER, USER-TOKEN) → session tier
//! ```

pub mod connection;
pub mod link;

pub use connection::ConnectionActor;
pub use link::{LinkError, SessionLink};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::ServerConfig;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics::EDGE_CONNECTIONS_ACTIVE;

/// Settings shared by every connection actor.
#[derive(Debug, Clone)]
pub struct EdgeSettings {
    pub idle_timeout: Duration,
    pub read_buffer_bytes: usize,
    pub session_address: String,
    pub connect_timeout: Duration,
    pub max_version: Arc<str>,
}

impl EdgeSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(config.edge.idle_read_timeout_secs),
            read_buffer_bytes: config.edge.read_buffer_bytes,
            session_address: config.edge.session_address.clone(),
            connect_timeout: Duration::from_secs(config.edge.connect_timeout_secs),
            max_version: Arc::from(config.protocol.max_version.as_str()),
        }
    }
}

/// Accept loop for client connections.
pub struct EdgeServer {
    settings: Arc<EdgeSettings>,
    tracker: ConnectionTracker,
}

impl EdgeServer {
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_settings(EdgeSettings::from_config(config))
    }

    pub fn with_settings(settings: EdgeSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            tracker: ConnectionTracker::new(EDGE_CONNECTIONS_ACTIVE),
        }
    }

    /// Live client connection count.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Accept clients until shutdown. Each one gets its own actor task.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        tracing::info!(
            address = ?listener.local_addr().ok(),
            session_address = %self.settings.session_address,
            "Edge server starting"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(active = self.tracker.active_count(), "Edge server stopping");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track();
                        let actor = ConnectionActor::new(guard.id(), peer, Arc::clone(&self.settings));
                        let shutdown = shutdown.resubscribe();
                        tokio::spawn(async move {
                            let _permit = permit;
                            let _guard = guard;
                            actor.run(stream, shutdown).await;
                        });
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Failed to accept client");
                    }
                    Err(e) => return Err(e),
                },
            }
        }
        Ok(())
    }
}

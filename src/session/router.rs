//! Session-tier accept loop.
//!
//! # Responsibilities
//! - Accept edge links on the loopback session port
//! - Read the identification frame and reject anonymous users
//! - Attach each link to the actor for its token, creating it on first sight

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::config::ServerConfig;
use crate::handler::ResourceHandler;
use crate::net::{ConnectionPermit, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics::SESSION_LINKS_ACTIVE;
use crate::protocol::request::{HEADER_USER, HEADER_USER_TOKEN};
use crate::protocol::response::{CODE_BAD_REQUEST, CODE_FORBIDDEN};
use crate::protocol::{self, Envelope, Field, Response};
use crate::session::actor::{SessionActor, SessionSettings};
use crate::session::registry::{Attachment, SessionRegistry};

/// Demultiplexes edge links onto session actors by token.
pub struct SessionRouter {
    settings: Arc<SessionSettings>,
    handler: Arc<dyn ResourceHandler>,
    registry: Arc<SessionRegistry>,
    tracker: ConnectionTracker,
    anonymous_user: String,
    ident_timeout: Duration,
    max_frame_bytes: Option<usize>,
}

impl SessionRouter {
    pub fn new(config: &ServerConfig, handler: Arc<dyn ResourceHandler>) -> Self {
        Self::with_registry(config, handler, Arc::new(SessionRegistry::new()))
    }

    /// Build a router around an existing registry, so callers can inspect it.
    pub fn with_registry(
        config: &ServerConfig,
        handler: Arc<dyn ResourceHandler>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            settings: Arc::new(SessionSettings::from_config(config)),
            handler,
            registry,
            tracker: ConnectionTracker::new(SESSION_LINKS_ACTIVE),
            anonymous_user: config.session.anonymous_user.clone(),
            ident_timeout: Duration::from_secs(config.session.ident_timeout_secs),
            max_frame_bytes: config.session.max_frame_bytes,
        }
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept links until shutdown.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        let router = Arc::new(self);
        tracing::info!(address = ?listener.local_addr().ok(), "Session router starting");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Session router stopping");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let router = Arc::clone(&router);
                        let shutdown = shutdown.resubscribe();
                        tokio::spawn(async move {
                            router.route(stream, peer, permit, shutdown).await;
                        });
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Failed to accept link");
                    }
                    Err(e) => return Err(e),
                },
            }
        }
        Ok(())
    }

    async fn route(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
        shutdown: broadcast::Receiver<()>,
    ) {
        let ident = match tokio::time::timeout(
            self.ident_timeout,
            protocol::read_envelope(&mut stream, self.max_frame_bytes),
        )
        .await
        {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(e)) => {
                tracing::debug!(peer_addr = %peer, error = %e, "Identification failed");
                return;
            }
            Err(_) => {
                tracing::debug!(peer_addr = %peer, "Identification timed out");
                return;
            }
        };

        let Some((user, token)) = identity(&ident) else {
            tracing::warn!(peer_addr = %peer, "Malformed identification");
            self.reject(stream, Response::error(CODE_BAD_REQUEST, "Invalid identification")).await;
            return;
        };
        if user == self.anonymous_user {
            tracing::info!(peer_addr = %peer, "Rejecting anonymous session");
            self.reject(stream, Response::error(CODE_FORBIDDEN, "Anonymous sessions are not allowed"))
                .await;
            return;
        }

        let attachment = Attachment {
            stream,
            peer,
            permit,
            guard: self.tracker.track(),
        };
        match SessionActor::attach_or_spawn(
            token,
            attachment,
            &self.settings,
            &self.handler,
            &self.registry,
            &shutdown,
        ) {
            Ok(handle) => tracing::debug!(peer_addr = %peer, user, session_id = %handle.id(), "Link routed"),
            Err(_) => tracing::warn!(peer_addr = %peer, user, "No live session accepted the link"),
        }
    }

    /// Answer with an error, then wait for the peer to hang up so the reply
    /// is not lost to a reset.
    async fn reject(&self, mut stream: TcpStream, response: Response) {
        if let Err(e) = protocol::write_envelope(&mut stream, &response.to_envelope()).await {
            tracing::debug!(error = %e, "Failed to write rejection");
            return;
        }
        let _ = stream.shutdown().await;
        let _ = tokio::time::timeout(self.ident_timeout, tokio::io::copy(&mut stream, &mut tokio::io::sink())).await;
    }
}

fn identity(envelope: &Envelope) -> Option<(&str, &str)> {
    let text = |key: &str| envelope.get(key).and_then(Field::as_text).filter(|s| !s.is_empty());
    Some((text(HEADER_USER)?, text(HEADER_USER_TOKEN)?))
}

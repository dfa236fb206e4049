//! One actor per session token.
//!
//! # Responsibilities
//! - Own every edge link attached for the token
//! - Read requests off each link into one shared FIFO
//! - Process requests strictly one at a time
//! - Tear everything down when the fixed lifetime runs out
//!
//! # Data Flow
//! ```text
//! link reader ─┐
//! link reader ─┼─→ events channel (FIFO) ─→ actor task ─→ handler / placeholder
//! link reader ─┘                                │
//!                                               └─→ response on the origin link
//! ```
//!
//! # Design Decisions
//! - The actor task is the only owner of the queue and the link writers, so
//!   a drain can never interleave with an in-flight process step
//! - The expiry deadline is set at creation and never renewed

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::handler::{placeholder, HandlerError, Privileged, ResourceHandler};
use crate::net::{ConnectionGuard, ConnectionId, ConnectionPermit};
use crate::observability::metrics;
use crate::protocol::{self, FrameError, Request, Response, WireError};
use crate::session::registry::{Attachment, SessionHandle, SessionId, SessionRegistry};

/// Attempts to find a live actor before giving up on a link.
const ATTACH_ATTEMPTS: usize = 3;

/// Per-actor settings derived from the server configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ttl: Duration,
    pub max_frame_bytes: Option<usize>,
    pub privileged: Privileged,
    pub placeholder_sender: Arc<str>,
}

impl SessionSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.session.ttl_secs),
            max_frame_bytes: config.session.max_frame_bytes,
            privileged: Privileged::new(config.handler.privileged_targets.clone()),
            placeholder_sender: Arc::from(config.handler.placeholder_sender.as_str()),
        }
    }
}

/// Lifecycle of a session actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Draining,
    Terminal,
}

/// What link readers report to the actor.
#[derive(Debug)]
enum SessionEvent {
    Request { request: Request, origin: ConnectionId },
    Detached { link: ConnectionId, reason: Option<String> },
}

struct Link {
    peer: SocketAddr,
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
    _permit: ConnectionPermit,
    _guard: ConnectionGuard,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Serializes all traffic for one token.
pub struct SessionActor {
    id: SessionId,
    token: Arc<str>,
    settings: Arc<SessionSettings>,
    handler: Arc<dyn ResourceHandler>,
    registry: Arc<SessionRegistry>,
    links: HashMap<ConnectionId, Link>,
    attachments: mpsc::UnboundedReceiver<Attachment>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    handler_ready: bool,
    state: SessionState,
}

impl SessionActor {
    /// Start an actor for `token` and return the handle the registry keeps.
    pub fn spawn(
        token: &str,
        settings: Arc<SessionSettings>,
        handler: Arc<dyn ResourceHandler>,
        registry: Arc<SessionRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> SessionHandle {
        let id = SessionId::new();
        let token: Arc<str> = Arc::from(token);
        let deadline = Instant::now() + settings.ttl;
        let (attach_tx, attachments) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        let actor = Self {
            id,
            token: Arc::clone(&token),
            settings,
            handler,
            registry,
            links: HashMap::new(),
            attachments,
            events_tx,
            events,
            handler_ready: false,
            state: SessionState::Active,
        };
        let span = tracing::info_span!("session", session_id = %id, token = %token);
        tokio::spawn(actor.run(deadline, shutdown).instrument(span));

        SessionHandle::new(id, token, attach_tx)
    }

    /// Attach a link to the live actor for `token`, spawning one when the
    /// registry has none. Gives the link back if every attempt raced with a
    /// closing actor.
    pub fn attach_or_spawn(
        token: &str,
        attachment: Attachment,
        settings: &Arc<SessionSettings>,
        handler: &Arc<dyn ResourceHandler>,
        registry: &Arc<SessionRegistry>,
        shutdown: &broadcast::Receiver<()>,
    ) -> Result<SessionHandle, Attachment> {
        let mut attachment = attachment;
        for _ in 0..ATTACH_ATTEMPTS {
            let handle = registry.get_or_spawn(token, || {
                Self::spawn(
                    token,
                    Arc::clone(settings),
                    Arc::clone(handler),
                    Arc::clone(registry),
                    shutdown.resubscribe(),
                )
            });
            match handle.attach(attachment) {
                Ok(()) => return Ok(handle),
                Err(back) => attachment = back,
            }
        }
        Err(attachment)
    }

    async fn run(mut self, deadline: Instant, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(ttl_secs = self.settings.ttl.as_secs(), "Session opened");
        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);

        let expired = loop {
            tokio::select! {
                biased;
                _ = &mut expiry => {
                    tracing::info!("Session expired");
                    break true;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Session stopping for shutdown");
                    break false;
                }
                Some(attachment) = self.attachments.recv() => self.attach(attachment),
                Some(event) = self.events.recv() => match event {
                    SessionEvent::Request { request, origin } => self.process(request, origin).await,
                    SessionEvent::Detached { link, reason } => self.detach(link, reason),
                },
            }
        };

        self.drain(expired.then_some(shutdown)).await;
    }

    fn attach(&mut self, attachment: Attachment) {
        let Attachment {
            stream,
            peer,
            permit,
            guard,
        } = attachment;
        let link_id = guard.id();
        let (read_half, writer) = stream.into_split();
        let reader = tokio::spawn(
            receive(link_id, read_half, self.settings.max_frame_bytes, self.events_tx.clone())
                .in_current_span(),
        );

        tracing::info!(connection_id = %link_id, peer_addr = %peer, links = self.links.len() + 1, "Link attached");
        self.links.insert(
            link_id,
            Link {
                peer,
                writer,
                reader,
                _permit: permit,
                _guard: guard,
            },
        );
    }

    fn detach(&mut self, link_id: ConnectionId, reason: Option<String>) {
        if let Some(link) = self.links.remove(&link_id) {
            match reason {
                None => tracing::info!(connection_id = %link_id, peer_addr = %link.peer, "Link closed by peer"),
                Some(reason) => {
                    tracing::warn!(connection_id = %link_id, peer_addr = %link.peer, reason = %reason, "Dropping link")
                }
            }
        }
    }

    async fn process(&mut self, request: Request, origin: ConnectionId) {
        let request_id = request.id();
        tracing::debug!(
            request_id = %request_id,
            connection_id = %origin,
            method = %request.method(),
            target = request.target().unwrap_or_default(),
            "Processing request"
        );

        let outcome = if self.settings.privileged.matches(&request) {
            self.call_handler(&request).await.map(|r| (r, "handled"))
        } else {
            Ok((placeholder::respond(&request, &self.settings.placeholder_sender), "placeholder"))
        };

        let outcome = outcome.and_then(|(response, label)| match response.validate() {
            Ok(()) => Ok((response, label)),
            Err(e) => Err(HandlerError::Rejected(format!("incomplete response: {e}"))),
        });

        match outcome {
            Ok((response, label)) => {
                metrics::record_session_request(label);
                self.respond(origin, &response, request_id).await;
            }
            Err(e) => {
                metrics::record_session_request("failed");
                tracing::warn!(request_id = %request_id, connection_id = %origin, error = %e, "Processing failed, closing link");
                self.close_link(origin).await;
            }
        }
    }

    async fn call_handler(&mut self, request: &Request) -> Result<Response, HandlerError> {
        if !self.handler_ready {
            self.handler.init().await?;
            self.handler_ready = true;
        }
        self.handler.process(request).await
    }

    async fn respond(&mut self, origin: ConnectionId, response: &Response, request_id: Uuid) {
        let Some(link) = self.links.get_mut(&origin) else {
            tracing::warn!(request_id = %request_id, connection_id = %origin, "Origin link gone, dropping response");
            return;
        };
        if let Err(e) = protocol::write_envelope(&mut link.writer, &response.to_envelope()).await {
            tracing::warn!(request_id = %request_id, connection_id = %origin, error = %e, "Failed to write response");
            self.close_link(origin).await;
        }
    }

    async fn close_link(&mut self, link_id: ConnectionId) {
        if let Some(mut link) = self.links.remove(&link_id) {
            let _ = link.writer.shutdown().await;
        }
    }

    /// Stop the session. Links that arrived too late to be served are handed
    /// to a successor actor when `successor` carries a shutdown receiver.
    async fn drain(mut self, successor: Option<broadcast::Receiver<()>>) {
        self.state = SessionState::Draining;
        tracing::debug!(state = ?self.state, links = self.links.len(), "Draining session");

        self.registry.remove(&self.token, self.id);
        self.attachments.close();
        for link in self.links.values() {
            link.reader.abort();
        }

        let mut stale = 0;
        while let Ok(event) = self.events.try_recv() {
            if let SessionEvent::Request { request, origin } = event {
                stale += 1;
                self.respond(origin, &Response::stale(), request.id()).await;
            }
        }
        while let Ok(attachment) = self.attachments.try_recv() {
            let peer = attachment.peer;
            let Some(shutdown) = &successor else {
                tracing::debug!(peer_addr = %peer, "Refusing late link during shutdown");
                continue;
            };
            match Self::attach_or_spawn(
                &self.token,
                attachment,
                &self.settings,
                &self.handler,
                &self.registry,
                shutdown,
            ) {
                Ok(handle) => tracing::debug!(peer_addr = %peer, successor = %handle.id(), "Late link handed over"),
                Err(_) => tracing::warn!(peer_addr = %peer, "No successor accepted late link"),
            }
        }

        let ids: Vec<ConnectionId> = self.links.keys().copied().collect();
        for link_id in ids {
            self.close_link(link_id).await;
        }

        metrics::record_expired_requests(stale);
        self.state = SessionState::Terminal;
        tracing::info!(state = ?self.state, answered_stale = stale, "Session closed");
    }
}

/// Receive duty for one link.
async fn receive(
    link_id: ConnectionId,
    mut reader: OwnedReadHalf,
    max_frame_bytes: Option<usize>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let reason = loop {
        let envelope = match protocol::read_envelope(&mut reader, max_frame_bytes).await {
            Ok(envelope) => envelope,
            Err(WireError::Frame(FrameError::ConnectionClosed)) => break None,
            Err(e) => break Some(e.to_string()),
        };
        match Request::from_envelope(envelope) {
            Ok(request) => {
                let event = SessionEvent::Request {
                    request,
                    origin: link_id,
                };
                if events.send(event).is_err() {
                    return;
                }
            }
            Err(e) => break Some(e.to_string()),
        }
    };
    let _ = events.send(SessionEvent::Detached { link: link_id, reason });
}

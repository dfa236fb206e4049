//! Per-client connection actor.
//!
//! # Responsibilities
//! - Receive raw bytes and cut them into requests with the incremental parser
//! - Forward requests to the session tier over per-token links
//! - Write responses back to the client in arrival order
//!
//! # Data Flow
//! ```text
//! socket read ─→ parser ─→ inbound queue ─→ forward duty ─→ SessionLink ─┐
//!       │                                                                │
//!       └─ parse error (ERR) ─→ outbound queue ←─ link reader ←──────────┘
//!                                    │
//!                                    └─→ reply duty ─→ socket write
//! ```
//!
//! # Design Decisions
//! - Duties end together: closing inbound ends forwarding, which drops every
//!   link and with it the last outbound producers
//! - A parse error answers the client and discards the rest of that read

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tracing::Instrument;

use crate::edge::link::SessionLink;
use crate::edge::EdgeSettings;
use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::protocol::response::CODE_UNAVAILABLE;
use crate::protocol::{self, Request, RequestParser, Response};

/// Drives one client connection.
pub struct ConnectionActor {
    id: ConnectionId,
    peer: SocketAddr,
    settings: Arc<EdgeSettings>,
}

impl ConnectionActor {
    pub fn new(id: ConnectionId, peer: SocketAddr, settings: Arc<EdgeSettings>) -> Self {
        Self { id, peer, settings }
    }

    /// Run until the client hangs up, the socket fails, or shutdown fires.
    pub async fn run(self, stream: TcpStream, shutdown: broadcast::Receiver<()>) {
        let span = tracing::info_span!("edge", connection_id = %self.id, peer_addr = %self.peer);
        async move {
            tracing::debug!("Client connected");
            let (read_half, write_half) = stream.into_split();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

            let reply = tokio::spawn(reply_to_client(write_half, outbound_rx).in_current_span());
            let forward = tokio::spawn(
                forward_to_session(Arc::clone(&self.settings), inbound_rx, outbound_tx.clone())
                    .in_current_span(),
            );

            self.receive(read_half, inbound_tx, outbound_tx, shutdown).await;

            let _ = forward.await;
            let _ = reply.await;
            tracing::debug!("Client disconnected");
        }
        .instrument(span)
        .await
    }

    async fn receive(
        &self,
        mut reader: OwnedReadHalf,
        inbound: mpsc::UnboundedSender<Request>,
        outbound: mpsc::UnboundedSender<Response>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let fresh = || RequestParser::with_max_version(Arc::clone(&self.settings.max_version));
        let mut parser = fresh();
        let mut buf = vec![0u8; self.settings.read_buffer_bytes];

        loop {
            let read = tokio::select! {
                _ = shutdown.recv() => break,
                read = tokio::time::timeout(self.settings.idle_timeout, reader.read(&mut buf)) => read,
            };
            let n = match read {
                Err(_) => {
                    if parser.has_partial() {
                        tracing::debug!("Idle timeout, discarding partial request");
                        parser = fresh();
                    }
                    continue;
                }
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "Client read failed");
                    break;
                }
            };

            let mut chunk = Bytes::copy_from_slice(&buf[..n]);
            loop {
                match parser.feed(&chunk) {
                    Ok(rest) if parser.is_done() => {
                        let done = std::mem::replace(&mut parser, fresh());
                        if let Some(request) = done.into_request() {
                            metrics::record_request_parsed(request.method().as_str());
                            tracing::debug!(request_id = %request.id(), method = %request.method(), "Request parsed");
                            if inbound.send(request).is_err() {
                                return;
                            }
                        }
                        if rest.is_empty() {
                            break;
                        }
                        chunk = rest;
                    }
                    Ok(_) => break,
                    Err(e) => {
                        metrics::record_parse_error(e.code());
                        tracing::info!(error = %e, code = e.code(), "Rejecting request");
                        let _ = outbound.send(Response::error(e.code(), e.to_string()));
                        parser = fresh();
                        break;
                    }
                }
            }
        }
    }
}

/// Forward duty: one link per `(USER, USER-TOKEN)`, opened on first use.
async fn forward_to_session(
    settings: Arc<EdgeSettings>,
    mut inbound: mpsc::UnboundedReceiver<Request>,
    outbound: mpsc::UnboundedSender<Response>,
) {
    let mut links: HashMap<(String, String), SessionLink> = HashMap::new();

    while let Some(request) = inbound.recv().await {
        let key = (request.user().to_owned(), request.token().to_owned());
        if links.get(&key).is_some_and(SessionLink::is_finished) {
            tracing::debug!(user = %key.0, "Discarding finished session link");
            links.remove(&key);
        }

        let link = match links.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                match SessionLink::open(
                    &settings.session_address,
                    settings.connect_timeout,
                    &key.0,
                    &key.1,
                    outbound.clone(),
                )
                .await
                {
                    Ok(link) => entry.insert(link),
                    Err(e) => {
                        tracing::warn!(request_id = %request.id(), error = %e, "Session tier unreachable");
                        let _ = outbound.send(unavailable());
                        continue;
                    }
                }
            }
        };

        if let Err(e) = link.send(&request).await {
            tracing::warn!(request_id = %request.id(), error = %e, "Failed to forward request");
            links.remove(&key);
            let _ = outbound.send(unavailable());
        }
    }
}

fn unavailable() -> Response {
    Response::error(CODE_UNAVAILABLE, "Session tier unavailable")
}

/// Reply duty: write responses in the order they arrive.
async fn reply_to_client(mut writer: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Response>) {
    while let Some(response) = outbound.recv().await {
        if let Err(e) = protocol::write_envelope(&mut writer, &response.to_envelope()).await {
            tracing::debug!(error = %e, "Client write failed");
            break;
        }
    }
}

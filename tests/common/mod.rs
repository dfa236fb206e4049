//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use cyan_server::config::ServerConfig;
use cyan_server::edge::EdgeServer;
use cyan_server::handler::{BoxFuture, HandlerError, ResourceHandler};
use cyan_server::lifecycle::Shutdown;
use cyan_server::net::Listener;
use cyan_server::protocol::response::CODE_OK;
use cyan_server::protocol::{Request, Response, ResponseKind};
use cyan_server::session::{SessionRegistry, SessionRouter};

/// Both tiers running on ephemeral loopback ports.
pub struct Cluster {
    pub edge_addr: SocketAddr,
    pub session_addr: SocketAddr,
    pub registry: Arc<SessionRegistry>,
    pub shutdown: Shutdown,
}

impl Cluster {
    pub fn edge(&self) -> String {
        self.edge_addr.to_string()
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Defaults with timeouts short enough for tests.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.edge.bind_address = "127.0.0.1:0".into();
    config.edge.connect_timeout_secs = 2;
    config.session.bind_address = "127.0.0.1:0".into();
    config.session.ident_timeout_secs = 2;
    config
}

/// Start the session tier and an edge pointed at it.
pub async fn start_cluster(mut config: ServerConfig, handler: Arc<dyn ResourceHandler>) -> Cluster {
    let shutdown = Shutdown::new();

    let session_listener = Listener::bind("session", &config.session.bind_address, 64).await.unwrap();
    let session_addr = session_listener.local_addr().unwrap();
    config.edge.session_address = session_addr.to_string();

    let registry = Arc::new(SessionRegistry::new());
    let router = SessionRouter::with_registry(&config, handler, Arc::clone(&registry));
    tokio::spawn(router.run(session_listener, shutdown.subscribe()));

    let edge_listener = Listener::bind("edge", &config.edge.bind_address, 64).await.unwrap();
    let edge_addr = edge_listener.local_addr().unwrap();
    tokio::spawn(EdgeServer::new(&config).run(edge_listener, shutdown.subscribe()));

    Cluster {
        edge_addr,
        session_addr,
        registry,
        shutdown,
    }
}

/// Handler that records the order of targets it saw and how many calls
/// overlapped.
#[derive(Default)]
pub struct RecordingHandler {
    pub seen: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    delay: Duration,
    gate: Option<Arc<Notify>>,
    gated_once: AtomicUsize,
}

impl RecordingHandler {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// The first request blocks until `gate` is notified.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl ResourceHandler for RecordingHandler {
    fn init(&self) -> BoxFuture<'_, Result<(), HandlerError>> {
        Box::pin(async { Ok(()) })
    }

    fn process<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, HandlerError>> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let target = request.target().unwrap_or_default().to_owned();
            self.seen.lock().unwrap().push(target.clone());

            if let Some(gate) = &self.gate {
                if self.gated_once.fetch_add(1, Ordering::SeqCst) == 0 {
                    gate.notified().await;
                }
            }
            tokio::time::sleep(self.delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Response::ack(CODE_OK).with_field("RESOURCE", target.as_str().into()))
        })
    }
}

/// Handler that always fails.
pub struct FailingHandler;

impl ResourceHandler for FailingHandler {
    fn init(&self) -> BoxFuture<'_, Result<(), HandlerError>> {
        Box::pin(async { Ok(()) })
    }

    fn process<'a>(&'a self, _request: &'a Request) -> BoxFuture<'a, Result<Response, HandlerError>> {
        Box::pin(async { Err(HandlerError::Store("unavailable".into())) })
    }
}

/// Handler that answers with a BIN response missing its payload fields.
pub struct HollowHandler;

impl ResourceHandler for HollowHandler {
    fn init(&self) -> BoxFuture<'_, Result<(), HandlerError>> {
        Box::pin(async { Ok(()) })
    }

    fn process<'a>(&'a self, _request: &'a Request) -> BoxFuture<'a, Result<Response, HandlerError>> {
        Box::pin(async { Ok(Response::new(ResponseKind::Bin, CODE_OK)) })
    }
}

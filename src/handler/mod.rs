//! Resource handling behind the session tier.
//!
//! # Responsibilities
//! - Define the [`ResourceHandler`] contract the session actor calls into
//! - Decide which targets are privileged (handled) and which get a placeholder
//! - Ship [`AcceptingHandler`], a stand-in for the real login backend
//!
//! # Design Decisions
//! - Object-safe trait returning boxed futures so one handler can be shared
//!   by every session actor behind an `Arc`
//! - `init` must be idempotent; actors call it lazily before first use

use std::future::Future;
use std::pin::Pin;

use crate::protocol::{Request, Response};

mod accepting;
pub mod placeholder;

pub use accepting::AcceptingHandler;

/// Boxed future type used by the handler trait.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors surfaced by a resource handler.
///
/// Any of these closes the connection the request came in on.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("handler initialization failed: {0}")]
    Init(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("backing store failure: {0}")]
    Store(String),
}

/// Business logic for privileged targets.
pub trait ResourceHandler: Send + Sync + 'static {
    /// Prepare the backing store. Safe to call more than once.
    fn init(&self) -> BoxFuture<'_, Result<(), HandlerError>>;

    /// Produce the response for one request.
    fn process<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, HandlerError>>;
}

/// Which requests are routed to the handler.
#[derive(Debug, Clone)]
pub struct Privileged {
    targets: Vec<String>,
}

impl Privileged {
    pub fn new(targets: Vec<String>) -> Self {
        Self { targets }
    }

    /// True when the request's target (`RESOURCE` for GET, `TARGET` for POST)
    /// is one of the configured privileged targets.
    pub fn matches(&self, request: &Request) -> bool {
        request
            .target()
            .is_some_and(|t| self.targets.iter().any(|p| p == t))
    }
}

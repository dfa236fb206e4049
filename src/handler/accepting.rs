use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{BoxFuture, HandlerError, ResourceHandler};
use crate::protocol::response::CODE_OK;
use crate::protocol::{Request, Response};

/// Acknowledges every request it is given.
///
/// Stands in for a real login service: the answer is `ACK 200` carrying the
/// requesting user and target.
#[derive(Debug, Default)]
pub struct AcceptingHandler {
    ready: AtomicBool,
    init_calls: AtomicUsize,
    processed: AtomicUsize,
}

impl AcceptingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `init` was invoked.
    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }
}

impl ResourceHandler for AcceptingHandler {
    fn init(&self) -> BoxFuture<'_, Result<(), HandlerError>> {
        Box::pin(async move {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if !self.ready.swap(true, Ordering::SeqCst) {
                tracing::debug!("Accepting handler ready");
            }
            Ok(())
        })
    }

    fn process<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, HandlerError>> {
        Box::pin(async move {
            if !self.ready.load(Ordering::SeqCst) {
                return Err(HandlerError::Init("process called before init".into()));
            }
            self.processed.fetch_add(1, Ordering::SeqCst);
            let response = Response::ack(CODE_OK).with_field("USER", request.user().into());
            Ok(match request.target() {
                Some(target) => response.with_field("RESOURCE", target.into()),
                None => response,
            })
        })
    }
}

//! Token → session actor lookup.
//!
//! # Responsibilities
//! - Map each live token to the handle of its actor
//! - Replace entries whose actor already stopped accepting connections
//! - Let an expiring actor remove exactly its own entry

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::net::{ConnectionGuard, ConnectionPermit};
use crate::observability::metrics;

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique id of one actor instance. A token may see many over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// An edge link waiting to be handed to an actor.
#[derive(Debug)]
pub struct Attachment {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub permit: ConnectionPermit,
    pub guard: ConnectionGuard,
}

/// Cheap, cloneable reference to a running actor.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    token: Arc<str>,
    attach: mpsc::UnboundedSender<Attachment>,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, token: Arc<str>, attach: mpsc::UnboundedSender<Attachment>) -> Self {
        Self { id, token, attach }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// True once the actor stopped taking new connections.
    pub fn is_closed(&self) -> bool {
        self.attach.is_closed()
    }

    /// Hand a connection to the actor. Gives it back if the actor is gone.
    pub fn attach(&self, attachment: Attachment) -> Result<(), Attachment> {
        self.attach
            .send(attachment)
            .map_err(|mpsc::error::SendError(attachment)| attachment)
    }
}

/// Registry of live session actors, keyed by token.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &str) -> Option<SessionHandle> {
        self.sessions.get(token).map(|h| h.clone())
    }

    /// Return the live actor for `token`, creating one with `spawn` when
    /// there is none or the existing one is closed.
    pub fn get_or_spawn<F>(&self, token: &str, spawn: F) -> SessionHandle
    where
        F: FnOnce() -> SessionHandle,
    {
        let handle = match self.sessions.entry(token.to_owned()) {
            Entry::Occupied(mut entry) if entry.get().is_closed() => {
                tracing::debug!(token, stale = %entry.get().id(), "Replacing closed session");
                let handle = spawn();
                entry.insert(handle.clone());
                handle
            }
            Entry::Occupied(entry) => return entry.get().clone(),
            Entry::Vacant(entry) => entry.insert(spawn()).clone(),
        };
        metrics::record_sessions_active(self.sessions.len());
        handle
    }

    /// Remove the entry for `token` only if it still belongs to `id`.
    pub fn remove(&self, token: &str, id: SessionId) -> bool {
        let removed = self.sessions.remove_if(token, |_, h| h.id() == id).is_some();
        if removed {
            metrics::record_sessions_active(self.sessions.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(token: &str) -> (SessionHandle, mpsc::UnboundedReceiver<Attachment>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionHandle::new(SessionId::new(), Arc::from(token), tx), rx)
    }

    #[test]
    fn reuses_live_entry() {
        let registry = SessionRegistry::new();
        let (first, _rx) = handle("tok");
        let first_id = first.id();
        registry.get_or_spawn("tok", || first);

        let again = registry.get_or_spawn("tok", || panic!("must not spawn"));
        assert_eq!(again.id(), first_id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn replaces_closed_entry() {
        let registry = SessionRegistry::new();
        let (first, rx) = handle("tok");
        let first_id = first.id();
        registry.get_or_spawn("tok", || first);
        drop(rx);

        let (second, _rx2) = handle("tok");
        let second_id = second.id();
        let got = registry.get_or_spawn("tok", || second);
        assert_eq!(got.id(), second_id);
        assert_ne!(got.id(), first_id);
    }

    #[test]
    fn remove_ignores_newer_actor() {
        let registry = SessionRegistry::new();
        let (old, _rx) = handle("tok");
        let old_id = old.id();
        let (new, _rx2) = handle("tok");
        let new_id = new.id();
        registry.get_or_spawn("tok", || new);

        assert!(!registry.remove("tok", old_id));
        assert_eq!(registry.get("tok").map(|h| h.id()), Some(new_id));
        assert!(registry.remove("tok", new_id));
        assert!(registry.is_empty());
    }
}

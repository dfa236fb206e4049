//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (id assignment, live count)
//!     → Hand off to the edge or session tier
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Both tiers share the same listener type

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};

//! Session tier.
//!
//! # Data Flow
//! ```text
//! edge link (loopback)
//!     → router.rs (identification, anonymous check)
//!     → registry.rs (token → actor handle)
//!     → actor.rs (shared FIFO, one request at a time)
//!     → handler (privileged targets) or placeholder
//!     → response frame on the originating link
//! ```
//!
//! # Design Decisions
//! - The registry is passed explicitly, never global
//! - An expiring actor removes only its own entry, so a fresh actor for the
//!   same token is never evicted by an old one

pub mod actor;
pub mod registry;
pub mod router;

pub use actor::{SessionActor, SessionSettings, SessionState};
pub use registry::{SessionHandle, SessionId, SessionRegistry};
pub use router::SessionRouter;

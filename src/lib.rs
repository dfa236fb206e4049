//! CYAN protocol server library.
//!
//! Two tiers: the edge terminates client connections and parses the CYAN
//! grammar; the session tier serializes all traffic for one token through a
//! single actor.

pub mod client;
pub mod config;
pub mod edge;
pub mod handler;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod session;

pub use config::schema::ServerConfig;
pub use edge::EdgeServer;
pub use lifecycle::Shutdown;
pub use session::SessionRouter;

//! CYAN wire protocol.
//!
//! # Data Flow
//! ```text
//! client bytes
//!     → parser.rs (incremental grammar, validation)
//!     → Request (request.rs)
//!     → envelope.rs (versioned MessagePack map)
//!     → frame.rs (4-byte length prefix)
//!     → session tier
//!
//! Response (response.rs) → envelope.rs → frame.rs → back to the client
//! ```
//!
//! # Design Decisions
//! - The client leg is a raw byte stream; the parser owns request boundaries
//! - Everything after the edge travels as framed envelopes
//! - Envelopes are validated on decode since they cross a trust boundary

pub mod envelope;
pub mod frame;
pub mod parser;
pub mod request;
pub mod response;

pub use envelope::{Envelope, EnvelopeError, Field};
pub use frame::FrameError;
pub use parser::{ParseError, RequestParser};
pub use request::{Headers, Method, Request};
pub use response::{Response, ResponseKind};

use tokio::io::{AsyncRead, AsyncWrite};

/// Errors moving envelopes over a framed stream.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// Read one frame and decode its envelope.
pub async fn read_envelope<R>(reader: &mut R, max_len: Option<usize>) -> Result<Envelope, WireError>
where
    R: AsyncRead + Unpin,
{
    let payload = frame::read_frame(reader, max_len).await?;
    Ok(envelope::decode(&payload)?)
}

/// Encode an envelope and write it as one frame.
pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let payload = envelope::encode(envelope)?;
    frame::write_frame(writer, &payload).await?;
    Ok(())
}

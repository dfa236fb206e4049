//! Downstream link from an edge connection to the session tier.

use std::time::Duration;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::protocol::request::{HEADER_USER, HEADER_USER_TOKEN};
use crate::protocol::{self, Envelope, FrameError, Request, Response, WireError};

/// Errors opening or using a session link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("failed to connect to session tier: {0}")]
    Connect(#[from] std::io::Error),

    #[error("timed out connecting to session tier")]
    Timeout,

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// One identified connection to the session tier for a `(USER, USER-TOKEN)`
/// pair. Responses read from it are pushed onto the client's outbound queue.
pub struct SessionLink {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

impl SessionLink {
    /// Connect, send the identification frame and start the downstream reader.
    pub async fn open(
        address: &str,
        connect_timeout: Duration,
        user: &str,
        token: &str,
        outbound: mpsc::UnboundedSender<Response>,
    ) -> Result<Self, LinkError> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| LinkError::Timeout)??;
        let _ = stream.set_nodelay(true);
        let (mut read_half, mut writer) = stream.into_split();

        let mut ident = Envelope::new();
        ident.insert(HEADER_USER.to_owned(), user.into());
        ident.insert(HEADER_USER_TOKEN.to_owned(), token.into());
        protocol::write_envelope(&mut writer, &ident).await?;

        let reader = tokio::spawn(
            async move {
                loop {
                    let envelope = match protocol::read_envelope(&mut read_half, None).await {
                        Ok(envelope) => envelope,
                        Err(WireError::Frame(FrameError::ConnectionClosed)) => {
                            tracing::debug!("Session link closed by peer");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Session link read failed");
                            break;
                        }
                    };
                    match Response::from_envelope(envelope) {
                        Ok(response) => {
                            if outbound.send(response).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Invalid response from session tier");
                            break;
                        }
                    }
                }
            }
            .in_current_span(),
        );

        tracing::debug!(user, "Session link opened");
        Ok(Self { writer, reader })
    }

    /// Forward one request.
    pub async fn send(&mut self, request: &Request) -> Result<(), LinkError> {
        protocol::write_envelope(&mut self.writer, &request.to_envelope()).await?;
        Ok(())
    }

    /// True once the session side stopped sending (closed, expired or broken).
    pub fn is_finished(&self) -> bool {
        self.reader.is_finished()
    }
}

impl Drop for SessionLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::response::CODE_OK;
    use crate::protocol::{ResponseKind, RequestParser};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn identifies_then_relays_responses() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let peer = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let ident = protocol::read_envelope(&mut stream, None).await.unwrap();
            let request = protocol::read_envelope(&mut stream, None).await.unwrap();
            protocol::write_envelope(&mut stream, &Response::ack(CODE_OK).to_envelope())
                .await
                .unwrap();
            (ident, request)
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut link = SessionLink::open(&addr, Duration::from_secs(1), "u1", "tok", tx)
            .await
            .unwrap();
        let mut parser = RequestParser::new();
        parser.feed(b"CYAN 0.1\nGET u1 /r\nUSER-TOKEN:tok\n::").unwrap();
        link.send(&parser.into_request().unwrap()).await.unwrap();

        let response = rx.recv().await.unwrap();
        assert_eq!(response.kind(), ResponseKind::Ack);

        let (ident, request) = peer.await.unwrap();
        assert_eq!(ident.get("USER").and_then(|f| f.as_text()), Some("u1"));
        assert_eq!(ident.get("USER-TOKEN").and_then(|f| f.as_text()), Some("tok"));
        assert_eq!(request.get("RESOURCE").and_then(|f| f.as_text()), Some("/r"));

        // Peer task ended and dropped its socket.
        tokio::time::timeout(Duration::from_secs(1), async {
            while !link.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = SessionLink::open(&addr, Duration::from_secs(1), "u1", "tok", tx)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LinkError::Connect(_)));
    }
}

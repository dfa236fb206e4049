//! Minimal async CYAN client.
//!
//! Writes requests in the raw text grammar and reads framed responses back.

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::protocol::response::ResponseError;
use crate::protocol::{self, Response, WireError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("invalid response: {0}")]
    Response(#[from] ResponseError),
}

/// Build a GET request.
pub fn get_request(version: &str, user: &str, resource: &str, token: &str) -> Vec<u8> {
    format!("CYAN {version}\nGET {user} {resource}\nUSER-TOKEN:{token}\n::").into_bytes()
}

/// Fields of an upload.
#[derive(Debug, Clone)]
pub struct PostRequest<'a> {
    pub user: &'a str,
    pub token: &'a str,
    pub target: &'a str,
    pub content_type: &'a str,
    pub checksum: &'a str,
    pub time_sent: u64,
    pub body: &'a [u8],
}

impl PostRequest<'_> {
    /// Render the request, body included.
    pub fn encode(&self, version: &str) -> Vec<u8> {
        let mut raw = format!(
            "CYAN {version}\nPOST {}\nUSER-TOKEN:{}\nTARGET:{}\nTYPE:{}\nCHECKSUM:{}\nTIME-SENT:{}\nLENGTH:{}\nBIN::",
            self.user,
            self.token,
            self.target,
            self.content_type,
            self.checksum,
            self.time_sent,
            self.body.len()
        )
        .into_bytes();
        raw.extend_from_slice(self.body);
        raw
    }
}

/// One client connection to the edge tier.
pub struct CyanClient {
    stream: TcpStream,
    version: String,
}

impl CyanClient {
    pub async fn connect(address: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            version: "0.1".to_owned(),
        })
    }

    /// Protocol version written on the first line of each request.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Write bytes as-is. Useful for pipelining or malformed input.
    pub async fn send_raw(&mut self, raw: &[u8]) -> Result<(), ClientError> {
        self.stream.write_all(raw).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Wait for the next response.
    pub async fn recv(&mut self) -> Result<Response, ClientError> {
        let envelope = protocol::read_envelope(&mut self.stream, None).await?;
        Ok(Response::from_envelope(envelope)?)
    }

    pub async fn get(&mut self, user: &str, resource: &str, token: &str) -> Result<Response, ClientError> {
        let raw = get_request(&self.version, user, resource, token);
        self.send_raw(&raw).await?;
        self.recv().await
    }

    pub async fn post(&mut self, request: &PostRequest<'_>) -> Result<Response, ClientError> {
        let raw = request.encode(&self.version);
        self.send_raw(&raw).await?;
        self.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Method, RequestParser};

    #[test]
    fn encoded_requests_parse() {
        let mut parser = RequestParser::new();
        let rest = parser.feed(&get_request("0.1", "u1", "/feed", "tok")).unwrap();
        assert!(rest.is_empty());
        let get = parser.into_request().unwrap();
        assert_eq!(get.method(), Method::Get);
        assert_eq!(get.target(), Some("/feed"));

        let post = PostRequest {
            user: "u1",
            token: "tok",
            target: "/feed",
            content_type: "text",
            checksum: "abc",
            time_sent: 17,
            body: b"hello",
        };
        let mut parser = RequestParser::new();
        let rest = parser.feed(&post.encode("0.1")).unwrap();
        assert!(rest.is_empty());
        let request = parser.into_request().unwrap();
        assert_eq!(request.method(), Method::Post);
        assert_eq!(&request.body()[..], b"hello");
        assert_eq!(request.header("LENGTH"), Some("5"));
    }
}

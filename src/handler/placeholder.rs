//! Fixed answers for targets no handler owns yet.

use bytes::Bytes;

use crate::protocol::request::{HEADER_CHECKSUM, HEADER_LENGTH, HEADER_RESOURCE, HEADER_TYPE, HEADER_USER};
use crate::protocol::response::CODE_OK;
use crate::protocol::{Field, Method, Request, Response};

pub const PLACEHOLDER_RESOURCE_ID: &str = "ID_OF_RESOURCE";
pub const PLACEHOLDER_CHECKSUM: &str = "IloveCats";
pub const PLACEHOLDER_TIME_SENT: i64 = 88_008_800;
pub const PLACEHOLDER_BODY: &[u8] = b"You did a great job";

/// Synthesize the stand-in response for a non-privileged request.
///
/// POST gets `ACK 200` echoing what was stored; GET gets `BIN 200` with a
/// fixed body.
pub fn respond(request: &Request, sender: &str) -> Response {
    let echo = |name: &str| Field::from(request.header(name).unwrap_or_default());
    match request.method() {
        Method::Post => Response::ack(CODE_OK)
            .with_field(HEADER_USER, echo(HEADER_USER))
            .with_field(HEADER_RESOURCE, PLACEHOLDER_RESOURCE_ID.into())
            .with_field(HEADER_TYPE, echo(HEADER_TYPE))
            .with_field(HEADER_CHECKSUM, echo(HEADER_CHECKSUM))
            .with_field(HEADER_LENGTH, echo(HEADER_LENGTH)),
        Method::Get => Response::binary(
            sender,
            PLACEHOLDER_TIME_SENT,
            PLACEHOLDER_CHECKSUM,
            Bytes::from_static(PLACEHOLDER_BODY),
        )
        .with_field(HEADER_USER, echo(HEADER_USER))
        .with_field(HEADER_RESOURCE, echo(HEADER_RESOURCE))
        .with_field(HEADER_TYPE, "text".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RequestParser, ResponseKind};

    fn parse(raw: &[u8]) -> Request {
        let mut parser = RequestParser::new();
        parser.feed(raw).unwrap();
        parser.into_request().unwrap()
    }

    #[test]
    fn post_echoes_upload_metadata() {
        let request = parse(
            b"CYAN 0.1\nPOST u7\nUSER-TOKEN:t\nTARGET:/feed\nTYPE:image\nCHECKSUM:abc\nTIME-SENT:5\nLENGTH:3\nBIN::xyz",
        );
        let response = respond(&request, "u000000");
        assert_eq!(response.kind(), ResponseKind::Ack);
        assert_eq!(response.code(), CODE_OK);
        for (key, value) in [("USER", "u7"), ("TYPE", "image"), ("CHECKSUM", "abc"), ("LENGTH", "3")] {
            assert_eq!(response.field(key).and_then(Field::as_text), Some(value), "{key}");
        }
        assert!(response.validate().is_ok());
    }

    #[test]
    fn get_returns_fixed_body() {
        let request = parse(b"CYAN 0.1\nGET u7 /feed\nUSER-TOKEN:t\n::");
        let response = respond(&request, "u000000");
        assert_eq!(response.kind(), ResponseKind::Bin);
        assert!(response.validate().is_ok());
        assert_eq!(
            response.field("BIN").and_then(Field::as_bytes).map(|b| &b[..]),
            Some(PLACEHOLDER_BODY)
        );
        assert_eq!(response.field("LENGTH").and_then(Field::as_int), Some(19));
        assert_eq!(response.field("SENDER").and_then(Field::as_text), Some("u000000"));
    }
}

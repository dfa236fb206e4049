//! CYAN responses.

use std::fmt;

use bytes::Bytes;
use thiserror::Error;

use super::envelope::{Envelope, Field};

pub const CODE_OK: u16 = 200;
pub const CODE_STALE: u16 = 304;
pub const CODE_BAD_REQUEST: u16 = 400;
pub const CODE_FORBIDDEN: u16 = 403;
pub const CODE_NOT_ALLOWED: u16 = 405;
pub const CODE_UNAVAILABLE: u16 = 503;

const KEY_RESP_TYPE: &str = "RESP-TYPE";
const KEY_CODE: &str = "CODE";
const KEY_TEXT: &str = "TEXT";

/// Fields a `BIN` response must carry besides type and code.
pub const BIN_RESPONSE_FIELDS: &[&str] = &["SENDER", "TIME-SENT", "CHECKSUM", "LENGTH", "BIN"];

/// Response category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Ack,
    Bin,
    Err,
}

impl ResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::Ack => "ACK",
            ResponseKind::Bin => "BIN",
            ResponseKind::Err => "ERR",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "ACK" => Some(ResponseKind::Ack),
            "BIN" => Some(ResponseKind::Bin),
            "ERR" => Some(ResponseKind::Err),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a response cannot be sent or accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("response is missing field {0}")]
    MissingField(String),

    #[error("unknown response type {0:?}")]
    UnknownKind(String),

    #[error("field {0} has the wrong type")]
    WrongType(&'static str),
}

/// A response on its way back to a client.
///
/// `fields` holds everything except `RESP-TYPE` and `CODE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    kind: ResponseKind,
    code: u16,
    fields: Envelope,
}

impl Response {
    pub fn new(kind: ResponseKind, code: u16) -> Self {
        Self {
            kind,
            code,
            fields: Envelope::new(),
        }
    }

    /// An `ERR` response carrying a human-readable description.
    pub fn error(code: u16, text: impl Into<String>) -> Self {
        Self::new(ResponseKind::Err, code).with_field(KEY_TEXT, Field::Text(text.into()))
    }

    /// The answer given to requests still queued when a session expires.
    pub fn stale() -> Self {
        Self::error(CODE_STALE, "Repeat request due to timeout")
    }

    pub fn ack(code: u16) -> Self {
        Self::new(ResponseKind::Ack, code)
    }

    /// A `BIN` response with all mandatory fields filled in.
    pub fn binary(sender: &str, time_sent: i64, checksum: &str, body: Bytes) -> Self {
        Self::new(ResponseKind::Bin, CODE_OK)
            .with_field("SENDER", sender.into())
            .with_field("TIME-SENT", Field::Int(time_sent))
            .with_field("CHECKSUM", checksum.into())
            .with_field("LENGTH", Field::Int(body.len() as i64))
            .with_field("BIN", Field::Bytes(body))
    }

    pub fn with_field(mut self, key: &str, value: Field) -> Self {
        self.fields.insert(key.to_owned(), value);
        self
    }

    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Envelope {
        &self.fields
    }

    pub fn text(&self) -> Option<&str> {
        self.field(KEY_TEXT).and_then(Field::as_text)
    }

    /// Check the type-specific mandatory fields are present.
    pub fn validate(&self) -> Result<(), ResponseError> {
        let required: &[&str] = match self.kind {
            ResponseKind::Ack => &[],
            ResponseKind::Bin => BIN_RESPONSE_FIELDS,
            ResponseKind::Err => &[KEY_TEXT],
        };
        match required.iter().find(|k| !self.fields.contains_key(**k)) {
            Some(missing) => Err(ResponseError::MissingField((*missing).to_owned())),
            None => Ok(()),
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let mut envelope = self.fields.clone();
        envelope.insert(KEY_RESP_TYPE.to_owned(), self.kind.as_str().into());
        envelope.insert(KEY_CODE.to_owned(), Field::Int(i64::from(self.code)));
        envelope
    }

    pub fn from_envelope(mut envelope: Envelope) -> Result<Self, ResponseError> {
        let kind = match envelope.remove(KEY_RESP_TYPE) {
            Some(Field::Text(s)) => ResponseKind::parse(&s).ok_or(ResponseError::UnknownKind(s))?,
            Some(_) => return Err(ResponseError::WrongType(KEY_RESP_TYPE)),
            None => return Err(ResponseError::MissingField(KEY_RESP_TYPE.to_owned())),
        };
        let code = match envelope.remove(KEY_CODE) {
            Some(Field::Int(n)) => u16::try_from(n).map_err(|_| ResponseError::WrongType(KEY_CODE))?,
            Some(_) => return Err(ResponseError::WrongType(KEY_CODE)),
            None => return Err(ResponseError::MissingField(KEY_CODE.to_owned())),
        };

        let response = Self {
            kind,
            code,
            fields: envelope,
        };
        response.validate()?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_carries_text() {
        let response = Response::error(CODE_NOT_ALLOWED, "METHOD X NOT ALLOWED");
        assert_eq!(response.kind(), ResponseKind::Err);
        assert_eq!(response.code(), 405);
        assert_eq!(response.text(), Some("METHOD X NOT ALLOWED"));
        assert!(response.validate().is_ok());
    }

    #[test]
    fn bin_response_survives_envelope() {
        let response = Response::binary("u000000", 88008800, "none", Bytes::from_static(b"payload"));
        let back = Response::from_envelope(response.to_envelope()).unwrap();
        assert_eq!(back, response);
        assert_eq!(back.field("LENGTH"), Some(&Field::Int(7)));
    }

    #[test]
    fn bin_response_missing_fields_is_rejected() {
        let response = Response::new(ResponseKind::Bin, CODE_OK).with_field("SENDER", "u1".into());
        assert_eq!(
            response.validate(),
            Err(ResponseError::MissingField("TIME-SENT".into()))
        );
        assert!(Response::from_envelope(response.to_envelope()).is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut envelope = Response::ack(CODE_OK).to_envelope();
        envelope.insert(KEY_RESP_TYPE.into(), "NOPE".into());
        assert_eq!(
            Response::from_envelope(envelope),
            Err(ResponseError::UnknownKind("NOPE".into()))
        );
    }
}

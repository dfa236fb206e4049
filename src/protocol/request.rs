//! Parsed CYAN requests and their inter-tier representation.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use uuid::Uuid;

use super::envelope::{Envelope, Field};

pub const HEADER_CYAN: &str = "CYAN";
pub const HEADER_REQ_TYPE: &str = "REQ-TYPE";
pub const HEADER_USER: &str = "USER";
pub const HEADER_RESOURCE: &str = "RESOURCE";
pub const HEADER_USER_TOKEN: &str = "USER-TOKEN";
pub const HEADER_TARGET: &str = "TARGET";
pub const HEADER_TYPE: &str = "TYPE";
pub const HEADER_CHECKSUM: &str = "CHECKSUM";
pub const HEADER_TIME_SENT: &str = "TIME-SENT";
pub const HEADER_LENGTH: &str = "LENGTH";
pub const HEADER_BIN: &str = "BIN";

/// Headers every GET must carry.
pub const REQUIRED_GET_HEADERS: &[&str] = &[
    HEADER_CYAN,
    HEADER_REQ_TYPE,
    HEADER_USER,
    HEADER_RESOURCE,
    HEADER_USER_TOKEN,
];

/// Headers a GET may carry in addition to the required ones.
pub const OPTIONAL_GET_HEADERS: &[&str] = &["ACCEPT-TYPE", "LAST_UPDATE"];

/// Headers every POST must carry. `BIN` is satisfied by the sentinel line.
pub const REQUIRED_POST_HEADERS: &[&str] = &[
    HEADER_CYAN,
    HEADER_REQ_TYPE,
    HEADER_USER,
    HEADER_USER_TOKEN,
    HEADER_TYPE,
    HEADER_CHECKSUM,
    HEADER_TIME_SENT,
    HEADER_LENGTH,
    HEADER_TARGET,
    HEADER_BIN,
];

/// Envelope key carrying the request id between tiers.
const REQUEST_ID_KEY: &str = "@rid";

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header mapping.
pub type Headers = BTreeMap<String, String>;

/// Reasons a request envelope cannot be turned back into a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestDecodeError {
    #[error("missing header {0}")]
    MissingHeader(&'static str),

    #[error("unknown request type {0}")]
    UnknownMethod(String),

    #[error("header {0} must be text")]
    NonTextHeader(String),

    #[error("body length {actual} does not match LENGTH {declared}")]
    LengthMismatch { declared: String, actual: usize },
}

/// A fully parsed and validated CYAN request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    id: Uuid,
    method: Method,
    headers: Headers,
    body: Bytes,
}

impl Request {
    pub(crate) fn new(method: Method, headers: Headers, body: Bytes) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            headers,
            body,
        }
    }

    /// Correlation id assigned when the request was parsed.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn user(&self) -> &str {
        self.header(HEADER_USER).unwrap_or_default()
    }

    pub fn token(&self) -> &str {
        self.header(HEADER_USER_TOKEN).unwrap_or_default()
    }

    /// The resource a GET asks for, or the target a POST writes to.
    pub fn target(&self) -> Option<&str> {
        match self.method {
            Method::Get => self.header(HEADER_RESOURCE),
            Method::Post => self.header(HEADER_TARGET),
        }
    }

    /// Inter-tier representation: every header as text, POST body under `BIN`.
    pub fn to_envelope(&self) -> Envelope {
        let mut envelope: Envelope = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Field::Text(v.clone())))
            .collect();
        envelope.insert(REQUEST_ID_KEY.to_owned(), Field::Text(self.id.to_string()));
        if self.method == Method::Post {
            envelope.insert(HEADER_BIN.to_owned(), Field::Bytes(self.body.clone()));
        }
        envelope
    }

    /// Rebuild a request received over the inter-tier link.
    ///
    /// Only the structural invariants are re-checked here; the grammar was
    /// validated by the edge tier.
    pub fn from_envelope(mut envelope: Envelope) -> Result<Self, RequestDecodeError> {
        let id = envelope
            .remove(REQUEST_ID_KEY)
            .and_then(|f| f.as_text().and_then(|s| Uuid::parse_str(s).ok()))
            .unwrap_or_else(Uuid::new_v4);
        let body = match envelope.remove(HEADER_BIN) {
            Some(Field::Bytes(b)) => b,
            Some(_) => return Err(RequestDecodeError::NonTextHeader(HEADER_BIN.to_owned())),
            None => Bytes::new(),
        };

        let mut headers = Headers::new();
        for (key, field) in envelope {
            match field {
                Field::Text(value) => {
                    headers.insert(key, value);
                }
                _ => return Err(RequestDecodeError::NonTextHeader(key)),
            }
        }

        let req_type = headers
            .get(HEADER_REQ_TYPE)
            .ok_or(RequestDecodeError::MissingHeader(HEADER_REQ_TYPE))?;
        let method =
            Method::parse(req_type).ok_or_else(|| RequestDecodeError::UnknownMethod(req_type.clone()))?;

        for required in [HEADER_USER, HEADER_USER_TOKEN] {
            if !headers.contains_key(required) {
                return Err(RequestDecodeError::MissingHeader(required));
            }
        }

        if method == Method::Post {
            let declared = headers
                .get(HEADER_LENGTH)
                .ok_or(RequestDecodeError::MissingHeader(HEADER_LENGTH))?;
            if declared.parse::<usize>().ok() != Some(body.len()) {
                return Err(RequestDecodeError::LengthMismatch {
                    declared: declared.clone(),
                    actual: body.len(),
                });
            }
        }

        Ok(Self {
            id,
            method,
            headers,
            body,
        })
    }
}

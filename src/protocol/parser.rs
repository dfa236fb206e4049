//! Incremental CYAN request parser.
//!
//! # Grammar
//! ```text
//! CYAN <version>
//! GET <user> <resource>        | POST <user>
//! <KEY>:<VALUE>                  (repeated, exactly one ':')
//! BIN                            (POST only, last header line)
//! ::<raw body>                   (POST body is exactly LENGTH bytes)
//! ```
//!
//! Bytes are buffered until the `::` marker shows up, then the whole header
//! block is validated once. A GET completes right there and every byte after
//! the marker is handed back. A POST keeps absorbing body bytes until
//! `LENGTH` is reached; anything past that is handed back.
//!
//! A parser that returned an error is finished: callers drop it and start a
//! new one.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use super::request::{
    Headers, Method, Request, HEADER_BIN, HEADER_CYAN, HEADER_LENGTH, HEADER_REQ_TYPE,
    HEADER_RESOURCE, HEADER_USER, OPTIONAL_GET_HEADERS, REQUIRED_GET_HEADERS, REQUIRED_POST_HEADERS,
};
use super::response::{CODE_BAD_REQUEST, CODE_NOT_ALLOWED};

/// Highest protocol version accepted unless configured otherwise.
pub const DEFAULT_MAX_VERSION: &str = "0.1";

/// Marker separating the header block from the body.
const BODY_MARKER: &[u8] = b"::";

const PROTOCOL_NAME: &str = "CYAN";
const BIN_SENTINEL: &[u8] = b"BIN";

/// Reasons a request is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid first line")]
    MalformedFirstLine,

    #[error("invalid protocol version {0:?}")]
    InvalidProtocolVersion(String),

    #[error("protocol version {0} not supported")]
    UnsupportedProtocolVersion(String),

    #[error("invalid request line")]
    MalformedRequestLine,

    #[error("invalid request type {0:?}")]
    UnsupportedMethod(String),

    #[error("invalid character {byte:#04x} in line {line}")]
    InvalidCharacter { line: usize, byte: u8 },

    #[error("header line {0} must contain exactly one ':'")]
    MultipleColonsInHeaderLine(usize),

    #[error("header line {0} is not KEY:VALUE")]
    MalformedHeaderLine(usize),

    #[error("duplicate header {0}")]
    DuplicateHeader(String),

    #[error("missing required header {0}")]
    MissingRequiredHeader(&'static str),

    #[error("header {0} not allowed")]
    DisallowedHeader(String),

    #[error("invalid LENGTH header {0:?}")]
    InvalidLengthValue(String),

    #[error("POST header block must end with BIN")]
    MissingBinSentinel,
}

impl ParseError {
    /// Status code reported to the client.
    pub fn code(&self) -> u16 {
        match self {
            ParseError::DisallowedHeader(_) => CODE_NOT_ALLOWED,
            _ => CODE_BAD_REQUEST,
        }
    }
}

/// Validated header block.
#[derive(Debug)]
struct Head {
    method: Method,
    headers: Headers,
    length: usize,
}

/// Incremental parser for one request.
#[derive(Debug)]
pub struct RequestParser {
    max_version: Arc<str>,
    header_block: BytesMut,
    head: Option<Head>,
    body: BytesMut,
    done: bool,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::with_max_version(Arc::from(DEFAULT_MAX_VERSION))
    }

    pub fn with_max_version(max_version: Arc<str>) -> Self {
        Self {
            max_version,
            header_block: BytesMut::new(),
            head: None,
            body: BytesMut::new(),
            done: false,
        }
    }

    /// Push more bytes and get back the ones that belong to the next request.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Bytes, ParseError> {
        if self.done {
            return Ok(Bytes::copy_from_slice(chunk));
        }

        let tail = match self.head {
            Some(_) => Bytes::copy_from_slice(chunk),
            None => {
                // The marker may straddle the previous chunk and this one.
                let search_from = self.header_block.len().saturating_sub(1);
                self.header_block.extend_from_slice(chunk);

                let Some(offset) = find_marker(&self.header_block[search_from..]) else {
                    return Ok(Bytes::new());
                };
                let rest = self.header_block.split_off(search_from + offset).freeze();
                let head = parse_head(&self.header_block, &self.max_version)?;
                let method = head.method;
                self.head = Some(head);

                let tail = rest.slice(BODY_MARKER.len()..);
                if method == Method::Get {
                    self.done = true;
                    return Ok(tail);
                }
                tail
            }
        };

        let length = self.head.as_ref().map_or(0, |h| h.length);
        let take = (length - self.body.len()).min(tail.len());
        self.body.extend_from_slice(&tail[..take]);
        self.done = self.body.len() == length;
        Ok(tail.slice(take..))
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Headers, once the header block validated.
    pub fn headers(&self) -> Option<&Headers> {
        self.head.as_ref().map(|h| &h.headers)
    }

    pub fn method(&self) -> Option<Method> {
        self.head.as_ref().map(|h| h.method)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// True when bytes of an unfinished request are buffered.
    pub fn has_partial(&self) -> bool {
        !self.done && (!self.header_block.is_empty() || self.head.is_some())
    }

    /// Finish the request. `None` until [`is_done`](Self::is_done).
    pub fn into_request(self) -> Option<Request> {
        if !self.done {
            return None;
        }
        let head = self.head?;
        Some(Request::new(head.method, head.headers, self.body.freeze()))
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

fn find_marker(haystack: &[u8]) -> Option<usize> {
    haystack.windows(BODY_MARKER.len()).position(|w| w == BODY_MARKER)
}

fn is_base_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'/'
}

fn is_line_char(line: usize, b: u8) -> bool {
    if line < 2 {
        is_base_char(b) || b == b' ' || b == b'.'
    } else {
        is_base_char(b) || b == b':'
    }
}

/// Dotted numeric version such as `0.1` or `1.2.3`.
fn is_version_token(token: &str) -> bool {
    let mut parts = token.split('.');
    let mut count = 0;
    let well_formed = parts.all(|p| {
        count += 1;
        !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit())
    });
    well_formed && count >= 2
}

fn parse_head(block: &[u8], max_version: &str) -> Result<Head, ParseError> {
    let mut lines: Vec<&[u8]> = block.split(|b| *b == b'\n').collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    // Structural pass.
    let last = lines.len().saturating_sub(1);
    for (num, line) in lines.iter().enumerate() {
        if let Some(&byte) = line.iter().find(|&&b| !is_line_char(num, b)) {
            return Err(ParseError::InvalidCharacter { line: num + 1, byte });
        }
        if num > 1 && num < last {
            header_line_shape(line, num + 1)?;
        }
    }

    let mut headers = Headers::new();

    let first = lines.first().map(|l| line_text(l)).unwrap_or_default();
    let version = match first.split_whitespace().collect::<Vec<_>>()[..] {
        [PROTOCOL_NAME, version] => version.to_owned(),
        _ => return Err(ParseError::MalformedFirstLine),
    };
    if !is_version_token(&version) {
        return Err(ParseError::InvalidProtocolVersion(version));
    }
    // Raw token comparison, so "0.10" sorts above "0.1".
    if version.as_bytes() > max_version.as_bytes() {
        return Err(ParseError::UnsupportedProtocolVersion(version));
    }
    headers.insert(HEADER_CYAN.to_owned(), version);

    let second = lines.get(1).map(|l| line_text(l)).ok_or(ParseError::MalformedRequestLine)?;
    let mut tokens = second.split_whitespace();
    let method_token = tokens.next().ok_or(ParseError::MalformedRequestLine)?;
    let rest: Vec<&str> = tokens.collect();
    let method = Method::parse(method_token)
        .ok_or_else(|| ParseError::UnsupportedMethod(method_token.to_owned()))?;
    match (method, &rest[..]) {
        (Method::Get, [user, resource]) => {
            headers.insert(HEADER_USER.to_owned(), (*user).to_owned());
            headers.insert(HEADER_RESOURCE.to_owned(), (*resource).to_owned());
        }
        (Method::Post, [user, ..]) => {
            headers.insert(HEADER_USER.to_owned(), (*user).to_owned());
        }
        _ => return Err(ParseError::MalformedRequestLine),
    }
    headers.insert(HEADER_REQ_TYPE.to_owned(), method.as_str().to_owned());

    let header_lines = if method == Method::Post {
        match lines.split_last() {
            Some((sentinel, rest)) if lines.len() > 2 && *sentinel == BIN_SENTINEL => &rest[2..],
            _ => return Err(ParseError::MissingBinSentinel),
        }
    } else {
        &lines[2..]
    };

    for (offset, line) in header_lines.iter().enumerate() {
        header_line_shape(line, offset + 3)?;
        let line = line_text(line);
        let Some((key, value)) = line.split_once(':') else {
            return Err(ParseError::MalformedHeaderLine(offset + 3));
        };
        // Lines 0 and 1 own CYAN, REQ-TYPE, USER and RESOURCE; BIN is the body.
        if key == HEADER_BIN || headers.contains_key(key) {
            return Err(ParseError::DuplicateHeader(key.to_owned()));
        }
        headers.insert(key.to_owned(), value.to_owned());
    }

    check_headers(method, &headers)?;

    let length = match method {
        Method::Get => 0,
        Method::Post => {
            let raw = &headers[HEADER_LENGTH];
            raw.parse::<usize>()
                .map_err(|_| ParseError::InvalidLengthValue(raw.clone()))?
        }
    };

    Ok(Head {
        method,
        headers,
        length,
    })
}

// Only called after the character check, so every byte is ASCII.
fn line_text(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

fn header_line_shape(line: &[u8], number: usize) -> Result<(), ParseError> {
    match line.iter().position(|&b| b == b':') {
        None | Some(0) => Err(ParseError::MalformedHeaderLine(number)),
        Some(at) if line[at + 1..].contains(&b':') => Err(ParseError::MultipleColonsInHeaderLine(number)),
        Some(_) => Ok(()),
    }
}

fn check_headers(method: Method, headers: &Headers) -> Result<(), ParseError> {
    let required = match method {
        Method::Get => REQUIRED_GET_HEADERS,
        Method::Post => REQUIRED_POST_HEADERS,
    };
    // BIN is the sentinel line, already checked.
    if let Some(missing) = required
        .iter()
        .find(|h| **h != HEADER_BIN && !headers.contains_key(**h))
    {
        return Err(ParseError::MissingRequiredHeader(*missing));
    }

    if method == Method::Get {
        if let Some(extra) = headers
            .keys()
            .find(|k| !REQUIRED_GET_HEADERS.contains(&k.as_str()) && !OPTIONAL_GET_HEADERS.contains(&k.as_str()))
        {
            return Err(ParseError::DisallowedHeader(extra.clone()));
        }
    }
    Ok(())
}

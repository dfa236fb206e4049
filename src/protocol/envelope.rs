//! Structured payload encoding shared by both tiers.
//!
//! Every framed payload is a MessagePack map from UTF-8 keys to text, binary
//! or integer values. The map carries a reserved schema version key so the
//! decoder can refuse anything it does not understand. Nothing else (floats,
//! nested containers, extension types) is accepted on decode.

use std::collections::BTreeMap;
use std::io::Cursor;

use bytes::Bytes;
use rmpv::Value;
use thiserror::Error;

/// Reserved key carrying the schema version.
pub const SCHEMA_VERSION_KEY: &str = "@v";

/// Schema version written and accepted by this build.
pub const SCHEMA_VERSION: i64 = 1;

/// A single envelope value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Text(String),
    Bytes(Bytes),
    Int(i64),
}

impl Field {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Field::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Field::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Field::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::Text(value.to_owned())
    }
}

impl From<String> for Field {
    fn from(value: String) -> Self {
        Field::Text(value)
    }
}

impl From<Bytes> for Field {
    fn from(value: Bytes) -> Self {
        Field::Bytes(value)
    }
}

impl From<i64> for Field {
    fn from(value: i64) -> Self {
        Field::Int(value)
    }
}

/// Ordered string-keyed map of fields.
pub type Envelope = BTreeMap<String, Field>;

/// Errors raised while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("messagepack encode error: {0}")]
    Encode(#[from] rmpv::encode::Error),

    #[error("messagepack decode error: {0}")]
    Decode(#[from] rmpv::decode::Error),

    #[error("payload contains trailing data")]
    TrailingData,

    #[error("envelope must be a map")]
    NotAMap,

    #[error("map keys must be UTF-8 strings")]
    InvalidKey,

    #[error("field {0} has an unsupported value type")]
    UnsupportedValue(String),

    #[error("schema version missing")]
    MissingSchemaVersion,

    #[error("unsupported schema version {0}")]
    UnsupportedSchemaVersion(i64),

    #[error("reserved key {0} cannot be used as a field")]
    ReservedKey(String),
}

/// Encode an envelope into MessagePack bytes.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, EnvelopeError> {
    let mut pairs = Vec::with_capacity(envelope.len() + 1);
    pairs.push((Value::from(SCHEMA_VERSION_KEY), Value::from(SCHEMA_VERSION)));

    for (key, field) in envelope {
        if key == SCHEMA_VERSION_KEY {
            return Err(EnvelopeError::ReservedKey(key.clone()));
        }
        let value = match field {
            Field::Text(s) => Value::from(s.as_str()),
            Field::Bytes(b) => Value::Binary(b.to_vec()),
            Field::Int(n) => Value::from(*n),
        };
        pairs.push((Value::from(key.as_str()), value));
    }

    let mut encoded = Vec::new();
    rmpv::encode::write_value(&mut encoded, &Value::Map(pairs))?;
    Ok(encoded)
}

/// Decode and validate MessagePack bytes into an envelope.
pub fn decode(payload: &[u8]) -> Result<Envelope, EnvelopeError> {
    let mut cursor = Cursor::new(payload);
    let value = rmpv::decode::read_value(&mut cursor)?;
    if cursor.position() as usize != payload.len() {
        return Err(EnvelopeError::TrailingData);
    }

    let Value::Map(entries) = value else {
        return Err(EnvelopeError::NotAMap);
    };

    let mut version = None;
    let mut envelope = Envelope::new();
    for (key, value) in entries {
        let Value::String(key) = key else {
            return Err(EnvelopeError::InvalidKey);
        };
        let key = key.into_str().ok_or(EnvelopeError::InvalidKey)?;

        if key == SCHEMA_VERSION_KEY {
            version = value.as_i64();
            if version.is_none() {
                return Err(EnvelopeError::UnsupportedValue(key));
            }
            continue;
        }

        let field = match value {
            Value::String(s) => match s.into_str() {
                Some(s) => Field::Text(s),
                None => return Err(EnvelopeError::UnsupportedValue(key)),
            },
            Value::Binary(b) => Field::Bytes(Bytes::from(b)),
            Value::Integer(n) => match n.as_i64() {
                Some(n) => Field::Int(n),
                None => return Err(EnvelopeError::UnsupportedValue(key)),
            },
            _ => return Err(EnvelopeError::UnsupportedValue(key)),
        };
        envelope.insert(key, field);
    }

    match version {
        None => Err(EnvelopeError::MissingSchemaVersion),
        Some(SCHEMA_VERSION) => Ok(envelope),
        Some(other) => Err(EnvelopeError::UnsupportedSchemaVersion(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        let mut envelope = Envelope::new();
        envelope.insert("USER".into(), "u0001".into());
        envelope.insert("CODE".into(), Field::Int(200));
        envelope.insert("BIN".into(), Field::Bytes(Bytes::from_static(b"\x00\xffraw")));
        envelope
    }

    #[test]
    fn decodes_what_it_encodes() {
        let envelope = sample();
        let bytes = encode(&envelope).unwrap();
        assert_eq!(decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn rejects_missing_schema_version() {
        let value = Value::Map(vec![(Value::from("USER"), Value::from("u0001"))]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &value).unwrap();

        assert!(matches!(decode(&bytes), Err(EnvelopeError::MissingSchemaVersion)));
    }

    #[test]
    fn rejects_future_schema_version() {
        let value = Value::Map(vec![(Value::from(SCHEMA_VERSION_KEY), Value::from(2))]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &value).unwrap();

        assert!(matches!(decode(&bytes), Err(EnvelopeError::UnsupportedSchemaVersion(2))));
    }

    #[test]
    fn rejects_nested_values() {
        let value = Value::Map(vec![
            (Value::from(SCHEMA_VERSION_KEY), Value::from(SCHEMA_VERSION)),
            (Value::from("LIST"), Value::Array(vec![Value::from(1)])),
        ]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &value).unwrap();

        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnsupportedValue(ref k) if k == "LIST"));
    }

    #[test]
    fn rejects_non_map_and_trailing_data() {
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &Value::from("nope")).unwrap();
        assert!(matches!(decode(&bytes), Err(EnvelopeError::NotAMap)));

        let mut bytes = encode(&sample()).unwrap();
        bytes.push(0xc0);
        assert!(matches!(decode(&bytes), Err(EnvelopeError::TrailingData)));
    }

    #[test]
    fn refuses_reserved_key_on_encode() {
        let mut envelope = Envelope::new();
        envelope.insert(SCHEMA_VERSION_KEY.into(), Field::Int(9));
        assert!(matches!(encode(&envelope), Err(EnvelopeError::ReservedKey(_))));
    }
}

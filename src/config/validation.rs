//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, value ranges and the protocol version token
//! - Keep the session tier on loopback
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ServerConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a loaded configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.edge.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("edge.bind_address", "not a socket address"));
    }
    if config.edge.session_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("edge.session_address", "not a socket address"));
    }
    match config.session.bind_address.parse::<SocketAddr>() {
        Ok(addr) if !addr.ip().is_loopback() => errors.push(ValidationError::new(
            "session.bind_address",
            "session tier must listen on a loopback address",
        )),
        Ok(_) => {}
        Err(_) => errors.push(ValidationError::new("session.bind_address", "not a socket address")),
    }

    let positive: [(&'static str, u64); 6] = [
        ("edge.max_connections", config.edge.max_connections as u64),
        ("edge.idle_read_timeout_secs", config.edge.idle_read_timeout_secs),
        ("edge.read_buffer_bytes", config.edge.read_buffer_bytes as u64),
        ("edge.connect_timeout_secs", config.edge.connect_timeout_secs),
        ("session.max_connections", config.session.max_connections as u64),
        ("session.ident_timeout_secs", config.session.ident_timeout_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }
    if config.session.ttl_secs == 0 {
        errors.push(ValidationError::new("session.ttl_secs", "must be greater than zero"));
    }
    if config.session.max_frame_bytes == Some(0) {
        errors.push(ValidationError::new("session.max_frame_bytes", "must be greater than zero when set"));
    }
    if config.session.anonymous_user.is_empty() {
        errors.push(ValidationError::new("session.anonymous_user", "must not be empty"));
    }

    let version = &config.protocol.max_version;
    let well_formed = version.contains('.')
        && version
            .split('.')
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    if !well_formed {
        errors.push(ValidationError::new("protocol.max_version", "expected a dotted numeric version"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn session_tier_must_be_loopback() {
        let mut config = ServerConfig::default();
        config.session.bind_address = "0.0.0.0:12346".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "session.bind_address");
    }

    #[test]
    fn reports_every_problem() {
        let mut config = ServerConfig::default();
        config.edge.bind_address = "nowhere".into();
        config.edge.idle_read_timeout_secs = 0;
        config.session.ttl_secs = 0;
        config.protocol.max_version = "latest".into();

        let fields: Vec<_> = validate_config(&config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(
            fields,
            vec![
                "edge.bind_address",
                "edge.idle_read_timeout_secs",
                "session.ttl_secs",
                "protocol.max_version"
            ]
        );
    }
}

//! Metrics collection and exposition.
//!
//! # Metrics
//! - `cyan_edge_connections_active` (gauge): open client connections
//! - `cyan_session_links_active` (gauge): open edge links on the session tier
//! - `cyan_requests_parsed_total` (counter): complete requests, by method
//! - `cyan_parse_errors_total` (counter): rejected requests, by code
//! - `cyan_sessions_active` (gauge): live session actors
//! - `cyan_session_requests_total` (counter): processed requests, by outcome
//! - `cyan_session_expired_requests_total` (counter): requests answered 304 on expiry
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - The Prometheus endpoint is optional and off by default

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

pub const EDGE_CONNECTIONS_ACTIVE: &str = "cyan_edge_connections_active";
pub const SESSION_LINKS_ACTIVE: &str = "cyan_session_links_active";
pub const REQUESTS_PARSED_TOTAL: &str = "cyan_requests_parsed_total";
pub const PARSE_ERRORS_TOTAL: &str = "cyan_parse_errors_total";
pub const SESSIONS_ACTIVE: &str = "cyan_sessions_active";
pub const SESSION_REQUESTS_TOTAL: &str = "cyan_session_requests_total";
pub const SESSION_EXPIRED_REQUESTS_TOTAL: &str = "cyan_session_expired_requests_total";

/// Start the Prometheus scrape endpoint. Must run inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request_parsed(method: &'static str) {
    metrics::counter!(REQUESTS_PARSED_TOTAL, "method" => method).increment(1);
}

pub fn record_parse_error(code: u16) {
    metrics::counter!(PARSE_ERRORS_TOTAL, "code" => code.to_string()).increment(1);
}

pub fn record_sessions_active(count: usize) {
    metrics::gauge!(SESSIONS_ACTIVE).set(count as f64);
}

/// `outcome` is one of `handled`, `placeholder`, `failed`.
pub fn record_session_request(outcome: &'static str) {
    metrics::counter!(SESSION_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_expired_requests(count: usize) {
    metrics::counter!(SESSION_EXPIRED_REQUESTS_TOTAL).increment(count as u64);
}

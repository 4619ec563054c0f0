//! Core domain types for Courier.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! The transport engine and every client family share these definitions.

mod error;
mod headers;

pub use error::{BoxError, FetchError, TransportError};
pub use headers::Headers;

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Client Kinds
// ============================================================================

/// Transport family a client belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    Http,
    Kafka,
    Rabbitmq,
}

impl ClientKind {
    pub const ALL: [ClientKind; 3] = [ClientKind::Http, ClientKind::Kafka, ClientKind::Rabbitmq];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ClientKind::Http => "http",
            ClientKind::Kafka => "kafka",
            ClientKind::Rabbitmq => "rabbitmq",
        }
    }

    /// Component type reported by every client, regardless of kind.
    #[must_use]
    pub const fn component_type(self) -> &'static str {
        "client"
    }

    /// Prefix shared by the instruments of a client: `client_<kind>.<name>`.
    #[must_use]
    pub fn instrument_prefix(self, client_name: &str) -> String {
        format!("client_{}.{client_name}", self.as_str())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Immediate sequential retry bound.
///
/// `retry_count` is the number of retries after the first attempt, so a call
/// makes at most `retry_count + 1` attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    retry_count: u32,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(retry_count: u32) -> Self {
        Self { retry_count }
    }

    #[must_use]
    pub const fn retry_count(self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub const fn max_attempts(self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Whether the 0-based `attempt` is the final one this policy permits.
    #[must_use]
    pub const fn is_last(self, attempt: u32) -> bool {
        attempt >= self.retry_count
    }
}

// ============================================================================
// Requests
// ============================================================================

/// HTTP verb used when a request does not name one.
pub const DEFAULT_METHOD: &str = "GET";

/// One outbound call, built by the caller and owned by the dispatch once sent.
///
/// `destination` is a URL for HTTP clients and a topic or queue name for
/// publish clients. `method` is only read by HTTP clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    destination: String,
    payload: Vec<u8>,
    headers: Headers,
}

impl Request {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            method: DEFAULT_METHOD.to_string(),
            destination: destination.into(),
            payload: Vec::new(),
            headers: Headers::new(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[must_use]
    pub fn into_parts(self) -> (String, String, Vec<u8>, Headers) {
        (self.method, self.destination, self.payload, self.headers)
    }
}

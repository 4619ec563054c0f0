//! Outcome classification for a single attempt.
//!
//! # Status families (HTTP-shaped transports)
//!
//! | Status            | Outcome     |
//! |-------------------|-------------|
//! | `200..=299`       | `Success`   |
//! | `499`, `500..=599`| `Retryable` |
//! | anything else     | `Fatal`     |
//!
//! Publish-shaped transports report [`Attempt::Published`] (success) or
//! [`Attempt::Rejected`] (retryable). A transport failure before any result is
//! always fatal.

use courier_types::{BoxError, Headers, TransportError};

use crate::Body;

/// Raw result of one transport attempt.
#[derive(Debug)]
pub enum Attempt {
    /// The destination answered with a status code.
    Status {
        code: u16,
        headers: Headers,
        body: Body,
    },
    /// The message was accepted by the producer or broker.
    Published,
    /// The producer or broker refused the message.
    Rejected(BoxError),
    /// The attempt failed before a status or publish result was known.
    Failed(TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    RetryableFailure,
    FatalFailure,
}

#[must_use]
pub const fn classify_status(code: u16) -> Outcome {
    match code {
        200..=299 => Outcome::Success,
        499 | 500..=599 => Outcome::RetryableFailure,
        _ => Outcome::FatalFailure,
    }
}

#[must_use]
pub fn classify(attempt: &Attempt) -> Outcome {
    match attempt {
        Attempt::Status { code, .. } => classify_status(*code),
        Attempt::Published => Outcome::Success,
        Attempt::Rejected(_) => Outcome::RetryableFailure,
        Attempt::Failed(_) => Outcome::FatalFailure,
    }
}

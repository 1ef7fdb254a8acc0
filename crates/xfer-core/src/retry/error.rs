//! Endpoint error type for retry classification.

use std::fmt;
use std::time::Duration;

/// Error returned by a single endpoint call (offset probe or upload).
/// Kept structured so the executor can classify it before turning it into a reason string.
#[derive(Debug)]
pub enum EndpointError {
    /// Curl reported an error (timeout, connection, etc.).
    Curl(curl::Error),
    /// Endpoint answered with a non-success HTTP status.
    Http {
        code: u32,
        /// `Retry-After` hint, if the endpoint sent one.
        retry_after: Option<Duration>,
        /// Offset the endpoint reports having stored, if it sent one.
        stored_offset: Option<u64>,
    },
    /// Fewer bytes than the body length reached the endpoint.
    PartialWrite {
        sent: u64,
        expected: u64,
        /// Offset the endpoint reports having stored, if known.
        stored_offset: Option<u64>,
    },
    /// Endpoint explicitly asked not to retry (`Upload-Retry: no`).
    Refused(String),
    /// Endpoint reply violated the upload protocol.
    Protocol(String),
    /// Reading the local payload failed.
    Payload(std::io::Error),
    /// Attempt aborted because the manager was cancelled.
    Cancelled,
}

impl EndpointError {
    /// Offset the endpoint reported in its failure reply, if any.
    pub fn stored_offset(&self) -> Option<u64> {
        match self {
            EndpointError::Http { stored_offset, .. }
            | EndpointError::PartialWrite { stored_offset, .. } => *stored_offset,
            _ => None,
        }
    }

    /// Server-provided retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            EndpointError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointError::Curl(e) => write!(f, "{}", e),
            EndpointError::Http { code, .. } => write!(f, "HTTP {}", code),
            EndpointError::PartialWrite { sent, expected, .. } => {
                write!(f, "partial write: sent {} of {} bytes", sent, expected)
            }
            EndpointError::Refused(msg) => write!(f, "endpoint refused upload: {}", msg),
            EndpointError::Protocol(msg) => write!(f, "protocol: {}", msg),
            EndpointError::Payload(e) => write!(f, "payload: {}", e),
            EndpointError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for EndpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EndpointError::Curl(e) => Some(e),
            EndpointError::Payload(e) => Some(e),
            _ => None,
        }
    }
}

//! Failure kinds, endpoint errors and the backoff schedule.
//!
//! `classify` turns an `EndpointError` into a `FailureKind`; `BackoffPolicy`
//! decides from the kind and attempt number whether and when to try again.

mod classify;
mod error;
mod policy;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use error::EndpointError;
pub use policy::{BackoffDecision, BackoffPolicy, FailureKind};

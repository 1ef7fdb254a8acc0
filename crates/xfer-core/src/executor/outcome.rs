use std::time::Duration;

use crate::retry::FailureKind;

/// Classified result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Endpoint stored the whole payload.
    Success,
    /// Retryable after backoff.
    Transient {
        kind: FailureKind,
        reason: String,
        /// Server-provided minimum wait.
        retry_after: Option<Duration>,
    },
    /// Retrying cannot help.
    Permanent { kind: FailureKind, reason: String },
}

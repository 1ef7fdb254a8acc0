//! Terminal reports and point-in-time snapshots for callers and supervisors.

use std::fmt;

use crate::descriptor::TransferId;
use crate::retry::FailureKind;

/// Why a transfer ended without being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// The endpoint rejected it or the payload was unusable.
    Rejected,
    /// Configured attempt cap reached on a transient failure.
    RetryLimit,
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureCause::Rejected => "rejected",
            FailureCause::RetryLimit => "retry limit",
            FailureCause::Cancelled => "cancelled",
            FailureCause::DeadlineExceeded => "deadline exceeded",
        };
        f.write_str(s)
    }
}

/// Terminal result observed by `wait`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferResult {
    Done,
    PermanentFailure { cause: FailureCause, reason: String },
}

impl TransferResult {
    pub fn is_done(&self) -> bool {
        matches!(self, TransferResult::Done)
    }

    pub fn cause(&self) -> Option<FailureCause> {
        match self {
            TransferResult::Done => None,
            TransferResult::PermanentFailure { cause, .. } => Some(*cause),
        }
    }
}

/// Everything known about a transfer once it is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub id: TransferId,
    /// Identifier the endpoint saw in `Upload-Id`.
    pub upload_id: String,
    pub endpoint: String,
    pub result: TransferResult,
    pub attempts: u32,
    pub bytes_sent: u64,
    pub last_failure: Option<FailureKind>,
}

/// Counts per state at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerSnapshot {
    pub pending: usize,
    pub in_flight: usize,
    pub waiting_backoff: usize,
    pub done: usize,
    pub failed: usize,
    /// Highest in-flight count seen since start.
    pub peak_in_flight: usize,
}

impl ManagerSnapshot {
    pub fn total(&self) -> usize {
        self.pending + self.in_flight + self.waiting_backoff + self.done + self.failed
    }

    /// True when every submitted transfer is terminal.
    pub fn is_settled(&self) -> bool {
        self.pending + self.in_flight + self.waiting_backoff == 0
    }
}

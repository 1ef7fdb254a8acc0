//! Transfer descriptors: identity, payload handle and per-transfer retry state.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::time::Instant;

use crate::retry::FailureKind;

/// Stable identifier of one transfer; never reused within a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// Eligible for an attempt as soon as an admission slot frees up.
    Pending,
    /// An attempt is running.
    InFlight,
    /// Last attempt failed transiently; not eligible until `next_eligible`.
    WaitingBackoff,
    Done,
    PermanentFailure,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Done | TransferState::PermanentFailure)
    }
}

/// Read-only handle to the bytes of an upload. The engine never modifies it.
#[derive(Debug, Clone)]
pub enum PayloadRef {
    /// Shared in-memory bytes.
    Memory(Arc<[u8]>),
    /// A file on disk, read at attempt time.
    File(PathBuf),
}

impl PayloadRef {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        PayloadRef::Memory(Arc::from(bytes.into()))
    }

    /// Current payload length in bytes.
    pub fn len(&self) -> io::Result<u64> {
        match self {
            PayloadRef::Memory(b) => Ok(b.len() as u64),
            PayloadRef::File(p) => Ok(std::fs::metadata(p)?.len()),
        }
    }

    /// Opens a reader positioned at `offset`.
    pub fn open_at(&self, offset: u64) -> io::Result<Box<dyn Read + Send>> {
        match self {
            PayloadRef::Memory(b) => {
                let mut cursor = Cursor::new(Arc::clone(b));
                cursor.set_position(offset);
                Ok(Box::new(cursor))
            }
            PayloadRef::File(p) => {
                let mut f = File::open(p)?;
                f.seek(SeekFrom::Start(offset))?;
                Ok(Box::new(f))
            }
        }
    }
}

impl fmt::Display for PayloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadRef::Memory(b) => write!(f, "<{} bytes in memory>", b.len()),
            PayloadRef::File(p) => write!(f, "{}", p.display()),
        }
    }
}

/// One file moving to one remote endpoint, plus its retry state.
///
/// Owned by the upload manager; the executor borrows it mutably for the
/// duration of a single attempt.
#[derive(Debug)]
pub struct TransferDescriptor {
    id: TransferId,
    /// Identifier sent to the endpoint as `Upload-Id`.
    upload_id: String,
    endpoint: String,
    payload: PayloadRef,
    pub(crate) attempt_count: u32,
    pub(crate) state: TransferState,
    pub(crate) next_eligible: Option<Instant>,
    pub(crate) last_failure: Option<FailureKind>,
    pub(crate) resume_offset: Option<u64>,
    pub(crate) bytes_sent: u64,
}

impl TransferDescriptor {
    pub fn new(id: TransferId, endpoint: impl Into<String>, payload: PayloadRef) -> Self {
        Self {
            id,
            upload_id: id.to_string(),
            endpoint: endpoint.into(),
            payload,
            attempt_count: 0,
            state: TransferState::Pending,
            next_eligible: None,
            last_failure: None,
            resume_offset: None,
            bytes_sent: 0,
        }
    }

    pub(crate) fn with_upload_id(mut self, upload_id: String) -> Self {
        self.upload_id = upload_id;
        self
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn payload(&self) -> &PayloadRef {
        &self.payload
    }

    /// Number of executor invocations so far.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn next_eligible(&self) -> Option<Instant> {
        self.next_eligible
    }

    pub fn last_failure(&self) -> Option<FailureKind> {
        self.last_failure
    }

    /// Offset the endpoint reported on the last partial receipt, if any.
    pub fn resume_offset(&self) -> Option<u64> {
        self.resume_offset
    }

    /// Payload bytes put on the wire across all attempts.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// True when an attempt may start at `now`.
    pub(crate) fn is_eligible(&self, now: Instant) -> bool {
        self.state == TransferState::Pending && self.next_eligible.map_or(true, |t| now >= t)
    }

    /// Moves a backed-off descriptor back to Pending once its wait is over.
    pub(crate) fn promote_if_due(&mut self, now: Instant) -> bool {
        if self.state == TransferState::WaitingBackoff && self.next_eligible.map_or(true, |t| now >= t)
        {
            self.state = TransferState::Pending;
            self.next_eligible = None;
            return true;
        }
        false
    }
}

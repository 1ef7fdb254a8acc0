//! Transfer executor: one attempt of one transfer against its endpoint.
//!
//! Picks the resume offset (reported offset from the last partial receipt,
//! else 0 on the first attempt, else a probe of the endpoint), sends the rest
//! of the payload and classifies whatever went wrong. Never returns an error:
//! every result is an `AttemptOutcome`.

mod outcome;

use std::io::{self, Read};
use std::sync::Arc;

use crate::control::CancelToken;
use crate::descriptor::TransferDescriptor;
use crate::endpoint::{UploadEndpoint, UploadTarget};
use crate::retry::{classify, EndpointError, FailureKind};

pub use outcome::AttemptOutcome;

/// Runs single upload attempts. Cheap to clone; shares the endpoint.
#[derive(Clone)]
pub struct TransferExecutor {
    endpoint: Arc<dyn UploadEndpoint>,
}

impl TransferExecutor {
    pub fn new(endpoint: Arc<dyn UploadEndpoint>) -> Self {
        Self { endpoint }
    }

    /// Perform one attempt. Increments `attempt_count` exactly once.
    ///
    /// Blocking; run it on the blocking pool from async code.
    pub fn attempt(&self, d: &mut TransferDescriptor, cancel: &CancelToken) -> AttemptOutcome {
        d.attempt_count += 1;
        let attempt = d.attempt_count;
        let _span = tracing::debug_span!("attempt", id = %d.id(), attempt).entered();

        if cancel.is_cancelled() {
            return record_failure(d, EndpointError::Cancelled);
        }

        let total = match d.payload().len() {
            Ok(n) => n,
            Err(e) => return record_failure(d, EndpointError::Payload(e)),
        };
        let url = d.endpoint().to_string();
        let upload_id = d.upload_id().to_string();
        let target = UploadTarget {
            id: d.id(),
            upload_id: &upload_id,
            url: &url,
            total_len: total,
        };

        let offset = match d.resume_offset {
            Some(off) => off,
            None if attempt == 1 => 0,
            None => match self.endpoint.stored_offset(&target) {
                Ok(off) => {
                    tracing::debug!(offset = off, "endpoint reports stored offset");
                    off
                }
                Err(e) => return record_failure(d, e),
            },
        };
        if offset > total {
            let e = EndpointError::Protocol(format!(
                "endpoint offset {} is past payload length {}",
                offset, total
            ));
            return record_failure(d, e);
        }

        let reader = match d.payload().open_at(offset) {
            Ok(r) => r,
            Err(e) => return record_failure(d, EndpointError::Payload(e)),
        };
        let mut body = CountingReader::new(reader.take(total - offset));
        tracing::debug!(offset, total, "sending payload");
        let result = self.endpoint.send(&target, offset, &mut body, cancel);
        d.bytes_sent += body.count;

        match result {
            Ok(()) => {
                d.resume_offset = None;
                tracing::debug!(bytes = body.count, "upload accepted");
                AttemptOutcome::Success
            }
            Err(e) => record_failure(d, e),
        }
    }
}

/// Classify `e`, remember it on the descriptor, and build the outcome.
fn record_failure(d: &mut TransferDescriptor, e: EndpointError) -> AttemptOutcome {
    let kind = classify(&e);
    d.last_failure = Some(kind);
    // A reported offset is where the next attempt resumes; without one the
    // next attempt asks the endpoint.
    d.resume_offset = e.stored_offset();
    let reason = e.to_string();
    tracing::debug!(%kind, %reason, "attempt failed");
    if kind.is_transient() {
        AttemptOutcome::Transient {
            kind,
            reason,
            retry_after: e.retry_after(),
        }
    } else {
        AttemptOutcome::Permanent { kind, reason }
    }
}

/// Counts bytes handed to the endpoint.
struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R> CountingReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

impl AttemptOutcome {
    /// Failure kind, if the attempt failed.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            AttemptOutcome::Success => None,
            AttemptOutcome::Transient { kind, .. } | AttemptOutcome::Permanent { kind, .. } => {
                Some(*kind)
            }
        }
    }
}

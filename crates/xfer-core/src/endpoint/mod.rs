//! Remote upload endpoint.
//!
//! `UploadEndpoint` is the seam between the engine and the wire. The shipped
//! implementation, `HttpEndpoint`, speaks a small resumable protocol over
//! libcurl:
//!
//! - `HEAD <url>` with `Upload-Id` → `Upload-Offset: <n>` (404 = nothing stored)
//! - `PUT <url>` with `Upload-Id`, `Upload-Offset: <k>` and
//!   `Content-Range: bytes k-(T-1)/T`, body = payload\[k..\]
//!
//! Failure replies may carry `Upload-Offset` (bytes kept from a partial
//! receipt), `Retry-After`, or `Upload-Retry: no`.

mod http;
mod parse;

use std::io::Read;

use crate::control::CancelToken;
use crate::descriptor::TransferId;
use crate::retry::EndpointError;

pub use http::{HttpEndpoint, HttpOptions};

/// What the endpoint needs to know about the upload being attempted.
#[derive(Debug, Clone, Copy)]
pub struct UploadTarget<'a> {
    pub id: TransferId,
    /// Wire identifier (`Upload-Id`); unique across managers.
    pub upload_id: &'a str,
    pub url: &'a str,
    /// Full payload length.
    pub total_len: u64,
}

/// A remote endpoint accepting resumable uploads.
///
/// Calls are blocking; the manager runs them on the blocking pool.
pub trait UploadEndpoint: Send + Sync {
    /// Bytes of this upload the endpoint already holds.
    fn stored_offset(&self, target: &UploadTarget<'_>) -> Result<u64, EndpointError>;

    /// Send `body`, which yields payload bytes starting at `offset`, until EOF.
    /// Implementations should abort promptly once `cancel` is set.
    fn send(
        &self,
        target: &UploadTarget<'_>,
        offset: u64,
        body: &mut dyn Read,
        cancel: &CancelToken,
    ) -> Result<(), EndpointError>;
}

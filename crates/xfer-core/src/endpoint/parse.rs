//! Parse upload-protocol response headers.

use std::time::Duration;

/// Headers the upload protocol cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct UploadHeaders {
    /// `Upload-Offset`: bytes the endpoint holds for this upload.
    pub upload_offset: Option<u64>,
    /// `Retry-After` in seconds.
    pub retry_after: Option<Duration>,
    /// `Upload-Retry: no`.
    pub no_retry: bool,
}

/// Parse collected header lines. Only the last response block counts
/// (interim `100 Continue` or redirect responses are discarded).
pub(crate) fn parse_headers(lines: &[String]) -> UploadHeaders {
    let mut out = UploadHeaders::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("HTTP/") {
            out = UploadHeaders::default();
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("upload-offset") {
                out.upload_offset = value.parse::<u64>().ok();
            } else if name.eq_ignore_ascii_case("retry-after") {
                out.retry_after = value.parse::<u64>().ok().map(Duration::from_secs);
            } else if name.eq_ignore_ascii_case("upload-retry") {
                out.no_retry = value.eq_ignore_ascii_case("no");
            }
        }
    }

    out
}

//! libcurl-backed implementation of the resumable upload protocol.

use std::io::{self, Read};
use std::str;
use std::time::Duration;

use curl::easy::{Easy, List, ReadError};

use super::parse::{parse_headers, UploadHeaders};
use super::{UploadEndpoint, UploadTarget};
use crate::control::CancelToken;
use crate::retry::EndpointError;

/// Curl timeouts applied to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpOptions {
    pub connect_timeout: Duration,
    /// Abort when throughput stays below this many bytes/s for `low_speed_time`.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    /// Safety net for completely stuck requests.
    pub timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            timeout: Duration::from_secs(3600),
        }
    }
}

/// Upload endpoint speaking HTTP via libcurl. Stateless; one curl handle per call.
#[derive(Debug, Clone, Default)]
pub struct HttpEndpoint {
    opts: HttpOptions,
}

impl HttpEndpoint {
    pub fn new(opts: HttpOptions) -> Self {
        Self { opts }
    }

    fn handle(&self, url: &str, headers: &[String]) -> Result<Easy, curl::Error> {
        let mut easy = Easy::new();
        easy.url(url)?;
        easy.follow_location(true)?;
        easy.connect_timeout(self.opts.connect_timeout)?;
        easy.low_speed_limit(self.opts.low_speed_limit)?;
        easy.low_speed_time(self.opts.low_speed_time)?;
        easy.timeout(self.opts.timeout)?;
        let mut list = List::new();
        for h in headers {
            list.append(h)?;
        }
        easy.http_headers(list)?;
        Ok(easy)
    }
}

fn is_success(code: u32) -> bool {
    matches!(code, 200 | 201 | 204)
}

fn failure_from_reply(code: u32, headers: &UploadHeaders) -> EndpointError {
    if headers.no_retry {
        return EndpointError::Refused(format!("HTTP {}", code));
    }
    EndpointError::Http {
        code,
        retry_after: headers.retry_after,
        stored_offset: headers.upload_offset,
    }
}

/// Value for `Content-Range` when sending payload[offset..total].
fn content_range(offset: u64, total: u64) -> String {
    if offset >= total {
        format!("bytes */{}", total)
    } else {
        format!("bytes {}-{}/{}", offset, total - 1, total)
    }
}

impl UploadEndpoint for HttpEndpoint {
    fn stored_offset(&self, target: &UploadTarget<'_>) -> Result<u64, EndpointError> {
        let mut lines: Vec<String> = Vec::new();
        let mut easy = self
            .handle(target.url, &[format!("Upload-Id: {}", target.upload_id)])
            .map_err(EndpointError::Curl)?;
        easy.nobody(true).map_err(EndpointError::Curl)?;
        {
            let mut transfer = easy.transfer();
            transfer
                .header_function(|data| {
                    if let Ok(s) = str::from_utf8(data) {
                        lines.push(s.trim_end().to_string());
                    }
                    true
                })
                .map_err(EndpointError::Curl)?;
            transfer.perform().map_err(EndpointError::Curl)?;
        }

        let code = easy.response_code().map_err(EndpointError::Curl)?;
        let headers = parse_headers(&lines);
        if code == 404 {
            return Ok(0);
        }
        if !is_success(code) {
            return Err(failure_from_reply(code, &headers));
        }
        headers
            .upload_offset
            .ok_or_else(|| EndpointError::Protocol("offset probe reply without Upload-Offset".into()))
    }

    fn send(
        &self,
        target: &UploadTarget<'_>,
        offset: u64,
        body: &mut dyn Read,
        cancel: &CancelToken,
    ) -> Result<(), EndpointError> {
        let remaining = target.total_len.saturating_sub(offset);
        let request_headers = [
            format!("Upload-Id: {}", target.upload_id),
            format!("Upload-Offset: {}", offset),
            format!("Content-Range: {}", content_range(offset, target.total_len)),
            // Send the body right away instead of waiting for 100 Continue.
            "Expect:".to_string(),
        ];
        let mut easy = self
            .handle(target.url, &request_headers)
            .map_err(EndpointError::Curl)?;
        easy.upload(true).map_err(EndpointError::Curl)?;
        easy.in_filesize(remaining).map_err(EndpointError::Curl)?;
        easy.progress(true).map_err(EndpointError::Curl)?;

        let mut lines: Vec<String> = Vec::new();
        let mut read_error: Option<io::Error> = None;
        let perform_result = {
            let mut transfer = easy.transfer();
            transfer
                .read_function(|buf| match body.read(buf) {
                    Ok(n) => Ok(n),
                    Err(e) => {
                        read_error = Some(e);
                        Err(ReadError::Abort)
                    }
                })
                .map_err(EndpointError::Curl)?;
            transfer
                .header_function(|data| {
                    if let Ok(s) = str::from_utf8(data) {
                        lines.push(s.trim_end().to_string());
                    }
                    true
                })
                .map_err(EndpointError::Curl)?;
            transfer
                .progress_function(|_, _, _, _| !cancel.is_cancelled())
                .map_err(EndpointError::Curl)?;
            transfer.perform()
        };

        if let Err(e) = perform_result {
            if let Some(io_err) = read_error {
                return Err(EndpointError::Payload(io_err));
            }
            if e.is_aborted_by_callback() && cancel.is_cancelled() {
                return Err(EndpointError::Cancelled);
            }
            return Err(EndpointError::Curl(e));
        }

        let code = easy.response_code().map_err(EndpointError::Curl)?;
        if !is_success(code) {
            return Err(failure_from_reply(code, &parse_headers(&lines)));
        }
        Ok(())
    }
}

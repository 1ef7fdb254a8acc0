//! Classify HTTP status and curl errors into failure kinds.

use super::error::EndpointError;
use super::policy::FailureKind;

/// Classify an HTTP status code returned by the upload endpoint.
pub fn classify_http_status(code: u32) -> FailureKind {
    match code {
        429 | 503 => FailureKind::Throttled,
        408 => FailureKind::Timeout,
        500..=599 => FailureKind::ServerError(code as u16),
        401 | 403 => FailureKind::Auth(code as u16),
        // Includes 409 (offset conflict): the endpoint disagrees with our
        // resume bookkeeping, and resending the same request cannot fix that.
        400..=499 => FailureKind::ClientError(code as u16),
        // 1xx/3xx reaching us means the exchange did not follow the protocol.
        _ => FailureKind::Protocol,
    }
}

/// Classify a curl error.
pub fn classify_curl_error(e: &curl::Error) -> FailureKind {
    if e.is_operation_timedout() {
        return FailureKind::Timeout;
    }
    if e.is_aborted_by_callback() {
        return FailureKind::Cancelled;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_got_nothing()
        || e.is_ssl_connect_error()
    {
        return FailureKind::Connection;
    }
    if e.is_send_error() || e.is_partial_file() || e.is_upload_failed() {
        return FailureKind::PartialWrite;
    }
    if e.is_url_malformed() || e.is_unsupported_protocol() {
        return FailureKind::ClientError(0);
    }
    FailureKind::Connection
}

/// Classify an endpoint error into a FailureKind.
pub fn classify(e: &EndpointError) -> FailureKind {
    match e {
        EndpointError::Curl(ce) => classify_curl_error(ce),
        EndpointError::Http { code, .. } => classify_http_status(*code),
        EndpointError::PartialWrite { .. } => FailureKind::PartialWrite,
        EndpointError::Refused(_) => FailureKind::Refused,
        EndpointError::Protocol(_) => FailureKind::Protocol,
        EndpointError::Payload(_) => FailureKind::Payload,
        EndpointError::Cancelled => FailureKind::Cancelled,
    }
}

//! Centralized error types for the relay core.
//!
//! Mirrors the "per-concern enum composed into one application error" shape:
//! each subsystem gets its own `thiserror` enum, and [`RelayCoreError`] unifies
//! them for the admin HTTP surface via `IntoResponse`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide a machine-readable error code for API
/// responses, independent of the human-readable `Display` string.
pub trait ErrorCode {
    fn code(&self) -> &'static str;
}

/// Errors from the MPEG/AAC frame-sync scanner.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no frame sync found within {0} bytes")]
    NoSync(usize),
    #[error("unprocessed tail of {0} bytes exceeds dead threshold")]
    SyncLost(usize),
}

/// Errors from the source ingest pipeline (`SourceFormat`).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("upstream connection closed")]
    Disconnected,
    #[error("malformed inline ICY metadata: {0}")]
    BadInlineMetadata(String),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("metadata payload too large ({0} bytes, max {1})")]
    MetadataOverflow(usize, usize),
    #[error("dump file write failed, disabling dump: {0}")]
    DumpWriteShort(String),
}

/// Errors from the per-listener writer.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("listener channel closed")]
    Disconnected,
    #[error("downstream write failed: {0}")]
    Write(String),
}

/// Errors from the relay controller / per-relay client state machine.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no masters left to try for mount {0}")]
    AllMastersFailed(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("bad response status {0}")]
    BadStatus(u16),
    #[error("too many redirects (> {0})")]
    TooManyRedirects(u8),
    #[error("mount {0} already owned by another relay")]
    MountBusy(String),
    #[error("invalid redirect location: {0}")]
    InvalidRedirect(String),
}

impl ErrorCode for SourceError {
    fn code(&self) -> &'static str {
        match self {
            Self::Disconnected => "source_disconnected",
            Self::BadInlineMetadata(_) => "bad_inline_metadata",
            Self::Sync(_) => "sync_lost",
            Self::MetadataOverflow(_, _) => "metadata_overflow",
            Self::DumpWriteShort(_) => "dump_write_short",
        }
    }
}

impl ErrorCode for ListenerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Disconnected => "listener_disconnected",
            Self::Write(_) => "listener_write_failed",
        }
    }
}

impl ErrorCode for RelayError {
    fn code(&self) -> &'static str {
        match self {
            Self::AllMastersFailed(_) => "all_masters_failed",
            Self::Http(_) => "relay_http_error",
            Self::BadStatus(_) => "relay_bad_status",
            Self::TooManyRedirects(_) => "relay_too_many_redirects",
            Self::MountBusy(_) => "mount_busy",
            Self::InvalidRedirect(_) => "relay_invalid_redirect",
        }
    }
}

/// Application-wide error type for the relay's admin HTTP surface.
#[derive(Debug, Error)]
pub enum RelayCoreError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),
    #[error("mount not found: {0}")]
    MountNotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayCoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Source(e) => e.code(),
            Self::Listener(e) => e.code(),
            Self::Relay(e) => e.code(),
            Self::MountNotFound(_) => "mount_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Configuration(_) => "configuration_error",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MountNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ResourceExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Relay(RelayError::MountBusy(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type RelayResult<T> = Result<T, RelayCoreError>;

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for RelayCoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_not_found_maps_to_404() {
        let err = RelayCoreError::MountNotFound("/live.mp3".into());
        assert_eq!(err.code(), "mount_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn mount_busy_maps_to_409() {
        let err: RelayCoreError = RelayError::MountBusy("/live.mp3".into()).into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn sync_lost_wraps_through_source_error() {
        let err: RelayCoreError = SourceError::Sync(SyncError::SyncLost(9000)).into();
        assert_eq!(err.code(), "sync_lost");
    }
}

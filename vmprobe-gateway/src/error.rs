//! Error types for the gateway crate.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use vmprobe_core::{CoreError, VmId};
use vmprobe_scanner::{ConfigError, ErrorKind, ScanError};

/// Errors that can occur during gateway request handling.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// A scan or hardware read failed.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// The request body is malformed or contains invalid values.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A scan for the same VM is still running.
    #[error("a scan of VM '{0}' is already in progress")]
    ScanInProgress(VmId),

    /// The scan task ended without producing a result.
    #[error("scan task failed: {0}")]
    TaskFailed(String),

    /// Logging could not be initialised.
    #[error("tracing initialisation failed: {0}")]
    Tracing(String),

    /// The configuration file could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The listen address could not be bound.
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server stopped with an I/O error.
    #[error("server error: {0}")]
    Server(#[source] std::io::Error),
}

impl From<CoreError> for GatewayError {
    fn from(err: CoreError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl GatewayError {
    /// HTTP status reported for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Scan(e) => match e.kind() {
                ErrorKind::VmNotFound => StatusCode::NOT_FOUND,
                ErrorKind::AmbiguousVm => StatusCode::CONFLICT,
                ErrorKind::AuthenticationFailure => StatusCode::UNAUTHORIZED,
                ErrorKind::ExportTimeout => StatusCode::GATEWAY_TIMEOUT,
                ErrorKind::NoOperatingSystemDetected => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::ManifestLoadFailure => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ScanInProgress(_) => StatusCode::CONFLICT,
            Self::TaskFailed(_) | Self::Tracing(_) | Self::Config(_) | Self::Bind { .. } | Self::Server(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable error category written to the response body.
    #[must_use]
    pub fn kind(&self) -> serde_json::Value {
        match self {
            Self::Scan(e) => serde_json::to_value(e.kind()).unwrap_or(serde_json::Value::Null),
            Self::InvalidRequest(_) => json!("InvalidRequest"),
            Self::ScanInProgress(_) => json!("ScanInProgress"),
            Self::TaskFailed(_) | Self::Tracing(_) | Self::Config(_) | Self::Bind { .. } | Self::Server(_) => {
                json!("Internal")
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let body = json!({"error": {"kind": self.kind(), "message": self.to_string()}});
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn vm_id() -> VmId {
        match VmId::new("4210-aa") {
            Ok(id) => id,
            Err(e) => panic!("invalid id: {e}"),
        }
    }

    #[test]
    fn gateway_error_status_codes_map_correctly() {
        let cases = [
            (GatewayError::Scan(ScanError::VmNotFound(vm_id())), StatusCode::NOT_FOUND),
            (GatewayError::Scan(ScanError::AmbiguousVm { vm_id: vm_id(), count: 2 }), StatusCode::CONFLICT),
            (
                GatewayError::Scan(ScanError::AuthenticationFailure { host: "vc".to_owned(), reason: "no".to_owned() }),
                StatusCode::UNAUTHORIZED,
            ),
            (
                GatewayError::Scan(ScanError::ExportTimeout {
                    disk_id: "d".to_owned(),
                    socket: PathBuf::from("/tmp/vm/d.sock"),
                    attempts: 10,
                }),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (GatewayError::Scan(ScanError::NoOperatingSystemDetected), StatusCode::UNPROCESSABLE_ENTITY),
            (GatewayError::Scan(ScanError::ManifestLoadFailure("gone".to_owned())), StatusCode::SERVICE_UNAVAILABLE),
            (GatewayError::Scan(ScanError::InspectionFailure("x".to_owned())), StatusCode::INTERNAL_SERVER_ERROR),
            (GatewayError::InvalidRequest("missing field".to_owned()), StatusCode::BAD_REQUEST),
            (GatewayError::ScanInProgress(vm_id()), StatusCode::CONFLICT),
            (GatewayError::Config(ConfigError::Parse("bad toml".to_owned())), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let msg = err.to_string();
            assert_eq!(err.into_response().status(), expected, "wrong status for {msg}");
        }
    }

    #[test]
    fn scan_errors_report_taxonomy_kind() {
        let err = GatewayError::Scan(ScanError::NoOperatingSystemDetected);
        assert_eq!(err.kind(), json!("NoOperatingSystemDetected"));
        assert_eq!(err.to_string(), "inspect_os: no operating systems found");
    }

    #[test]
    fn core_errors_become_invalid_requests() {
        let err: GatewayError = CoreError::InvalidRequest {
            field: "vm_uuid".to_owned(),
            reason: "must not be empty".to_owned(),
        }
        .into();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
        assert!(err.to_string().contains("vm_uuid"), "Display must include the field");
    }
}

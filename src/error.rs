use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("H.264 unavailable: {0}")]
    H264Unavailable(String),

    #[error("fMP4 unavailable: {0}")]
    Fmp4Unavailable(String),

    #[error("UDP unavailable: {0}")]
    UdpUnavailable(String),

    #[error("Video error: {0}")]
    Video(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error response body: `{"error":"kind","details":"msg"}`
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub details: String,
}

impl AppError {
    /// Stable machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::Conflict(_) => "conflict",
            AppError::NotFound(_) => "not_found",
            AppError::DeviceUnavailable(_) => "device_unavailable",
            AppError::H264Unavailable(_) => "h264_unavailable",
            AppError::Fmp4Unavailable(_) => "fmp4_unavailable",
            AppError::UdpUnavailable(_) => "udp_unavailable",
            AppError::Video(_) | AppError::Io(_) => "error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DeviceUnavailable(_)
            | AppError::H264Unavailable(_)
            | AppError::Fmp4Unavailable(_)
            | AppError::UdpUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Video(_) | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable detail without the kind prefix
    fn details(&self) -> String {
        match self {
            AppError::BadRequest(m)
            | AppError::Conflict(m)
            | AppError::NotFound(m)
            | AppError::DeviceUnavailable(m)
            | AppError::H264Unavailable(m)
            | AppError::Fmp4Unavailable(m)
            | AppError::UdpUnavailable(m)
            | AppError::Video(m) => m.clone(),
            AppError::Io(e) => e.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.kind(),
            details: self.details(),
        };

        tracing::debug!(kind = body.error, details = %body.details, "Request failed");

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(AppError::BadRequest("x".into()).kind(), "bad_request");
        assert_eq!(AppError::Conflict("x".into()).kind(), "conflict");
        assert_eq!(AppError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(
            AppError::DeviceUnavailable("x".into()).kind(),
            "device_unavailable"
        );
        assert_eq!(
            AppError::Fmp4Unavailable("x".into()).kind(),
            "fmp4_unavailable"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Conflict("locked".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::H264Unavailable("off".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::BadRequest("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}

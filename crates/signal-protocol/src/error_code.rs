//! Numeric error codes carried by outbound `Error` messages.
//!
//! Codes follow the SIP/HTTP numbering clients already know.

use serde::{Deserialize, Serialize};

/// Error code reported to clients in [`crate::ProtocolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ErrorCode {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    RequestTimeout,
    UnsupportedMediaType,
    TemporarilyUnavailable,
    Busy,
    InternalError,
    NotImplemented,
    ServiceUnavailable,
}

impl ErrorCode {
    /// Returns the numeric wire value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            ErrorCode::Ok => 200,
            ErrorCode::BadRequest => 400,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::RequestTimeout => 408,
            ErrorCode::UnsupportedMediaType => 415,
            ErrorCode::TemporarilyUnavailable => 480,
            ErrorCode::Busy => 486,
            ErrorCode::InternalError => 500,
            ErrorCode::NotImplemented => 501,
            ErrorCode::ServiceUnavailable => 503,
        }
    }

    /// Returns a bounded label for metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Ok => "ok",
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotFound => "not_found",
            ErrorCode::RequestTimeout => "request_timeout",
            ErrorCode::UnsupportedMediaType => "unsupported_media_type",
            ErrorCode::TemporarilyUnavailable => "temporarily_unavailable",
            ErrorCode::Busy => "busy",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::NotImplemented => "not_implemented",
            ErrorCode::ServiceUnavailable => "service_unavailable",
        }
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.as_i32()
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            200 => Ok(ErrorCode::Ok),
            400 => Ok(ErrorCode::BadRequest),
            403 => Ok(ErrorCode::Forbidden),
            404 => Ok(ErrorCode::NotFound),
            408 => Ok(ErrorCode::RequestTimeout),
            415 => Ok(ErrorCode::UnsupportedMediaType),
            480 => Ok(ErrorCode::TemporarilyUnavailable),
            486 => Ok(ErrorCode::Busy),
            500 => Ok(ErrorCode::InternalError),
            501 => Ok(ErrorCode::NotImplemented),
            503 => Ok(ErrorCode::ServiceUnavailable),
            other => Err(format!("unknown error code: {other}")),
        }
    }
}

//! Signal service error types.
//!
//! `SignalError` is the outcome of a terminated session. Recoverable protocol
//! errors never become a `SignalError`; they are reported to the client as an
//! `Error` message and the session keeps running.

use thiserror::Error;

/// WebSocket close code for internal failures.
pub const CLOSE_CODE_INTERNAL: u16 = 1011;

/// WebSocket close code for unclassified media engine failures.
pub const CLOSE_CODE_UNKNOWN: u16 = 4000;

/// Failure reading from the client connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// A frame arrived that is not a valid signaling message.
    /// Reported to the client; the session continues.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The underlying connection failed.
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Why a session terminated with an error.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Join or answer failed, or a send failed while completing a join.
    #[error("internal error: {0}")]
    Internal(String),

    /// Unclassified media engine failure.
    #[error("unknown error: {0}")]
    Unknown(String),

    /// Reading from the connection failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SignalError {
    /// Returns the WebSocket close code for this outcome.
    ///
    /// Transport failures have no close code: the connection is already gone.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        match self {
            SignalError::Internal(_) => Some(CLOSE_CODE_INTERNAL),
            SignalError::Unknown(_) => Some(CLOSE_CODE_UNKNOWN),
            SignalError::Transport(_) => None,
        }
    }

    /// Returns a bounded label for metrics.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            SignalError::Internal(_) => "internal",
            SignalError::Unknown(_) => "unknown",
            SignalError::Transport(_) => "transport",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_mapping() {
        assert_eq!(
            SignalError::Internal("join failed".to_string()).close_code(),
            Some(CLOSE_CODE_INTERNAL)
        );
        assert_eq!(
            SignalError::Unknown("engine".to_string()).close_code(),
            Some(CLOSE_CODE_UNKNOWN)
        );
        assert_eq!(
            SignalError::Transport(TransportError::Connection("reset".to_string())).close_code(),
            None
        );
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(SignalError::Internal(String::new()).outcome(), "internal");
        assert_eq!(SignalError::Unknown(String::new()).outcome(), "unknown");
        assert_eq!(
            SignalError::from(TransportError::Connection(String::new())).outcome(),
            "transport"
        );
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", SignalError::Internal("answer error: boom".to_string())),
            "internal error: answer error: boom"
        );
        assert_eq!(
            format!(
                "{}",
                SignalError::from(TransportError::Connection("reset by peer".to_string()))
            ),
            "transport error: connection failed: reset by peer"
        );
    }
}

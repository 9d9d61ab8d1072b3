//! Error handling for the register reader service
//!
//! One error enum covers the codec, the transports and the lifecycle manager.
//! Payloads are plain strings so errors can be cloned into status records and
//! sent across task boundaries.

use errors::{ErrorCategory, ErrorClass};
use thiserror::Error;

use crate::protocol::constants::exception_description;

/// Register reader error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegsrvError {
    /// Bad caller input
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Socket could not be opened
    #[error("Connection failed: {cause}")]
    ConnectionFailed { cause: String },

    /// Peer closed the socket or it broke mid-exchange
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A socket operation exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// RTU CRC mismatch
    #[error("Checksum error: received 0x{received:04X}, calculated 0x{calculated:04X}")]
    ChecksumError { received: u16, calculated: u16 },

    /// Response bytes do not form a valid reply
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// MBAP transaction id does not echo the request
    #[error("Transaction mismatch: expected {expected}, received {received}")]
    TransactionMismatch { expected: u16, received: u16 },

    /// Non-exception reply with the wrong function code
    #[error("Unexpected function code: expected 0x{expected:02X}, received 0x{received:02X}")]
    UnexpectedFunctionCode { expected: u8, received: u8 },

    /// The device answered with a Modbus exception
    #[error("Device exception 0x{code:02X} ({})", describe_exception(.code))]
    DeviceException { code: u8 },

    /// Transport already holds a socket
    #[error("Transport already connected")]
    AlreadyConnected,

    /// A connect sequence is in flight or the link is up
    #[error("Connection already active or in progress")]
    AlreadyActive,

    /// Another read holds the single-flight lock
    #[error("Read already in progress")]
    AlreadyInProgress,

    #[error("Not connected")]
    NotConnected,

    /// Connect sequence interrupted by disconnect
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors (task join failures and the like)
    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_exception(code: &u8) -> &'static str {
    exception_description(*code)
}

/// Result type alias for the register reader
pub type Result<T> = std::result::Result<T, RegsrvError>;

impl RegsrvError {
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        RegsrvError::InvalidParameter(msg.into())
    }

    pub fn connection_failed(cause: impl Into<String>) -> Self {
        RegsrvError::ConnectionFailed {
            cause: cause.into(),
        }
    }

    pub fn connection_lost(msg: impl Into<String>) -> Self {
        RegsrvError::ConnectionLost(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        RegsrvError::Timeout(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        RegsrvError::MalformedResponse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        RegsrvError::Config(msg.into())
    }

    /// Socket-class failure: the transport must be dropped
    pub fn is_link_failure(&self) -> bool {
        self.forces_disconnect()
    }
}

impl ErrorClass for RegsrvError {
    fn error_code(&self) -> &'static str {
        match self {
            RegsrvError::InvalidParameter(_) => "INVALID_PARAMETER",
            RegsrvError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            RegsrvError::ConnectionLost(_) => "CONNECTION_LOST",
            RegsrvError::Timeout(_) => "TIMEOUT",
            RegsrvError::ChecksumError { .. } => "CHECKSUM_ERROR",
            RegsrvError::MalformedResponse(_) => "MALFORMED_RESPONSE",
            RegsrvError::TransactionMismatch { .. } => "TRANSACTION_MISMATCH",
            RegsrvError::UnexpectedFunctionCode { .. } => "UNEXPECTED_FUNCTION_CODE",
            RegsrvError::DeviceException { .. } => "DEVICE_EXCEPTION",
            RegsrvError::AlreadyConnected => "ALREADY_CONNECTED",
            RegsrvError::AlreadyActive => "ALREADY_ACTIVE",
            RegsrvError::AlreadyInProgress => "ALREADY_IN_PROGRESS",
            RegsrvError::NotConnected => "NOT_CONNECTED",
            RegsrvError::Cancelled => "CANCELLED",
            RegsrvError::Config(_) => "CONFIG_ERROR",
            RegsrvError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            RegsrvError::InvalidParameter(_) => ErrorCategory::Validation,
            RegsrvError::ConnectionFailed { .. } | RegsrvError::ConnectionLost(_) => {
                ErrorCategory::Connection
            },
            RegsrvError::Timeout(_) => ErrorCategory::Timeout,
            RegsrvError::ChecksumError { .. }
            | RegsrvError::MalformedResponse(_)
            | RegsrvError::TransactionMismatch { .. }
            | RegsrvError::UnexpectedFunctionCode { .. } => ErrorCategory::Framing,
            RegsrvError::DeviceException { .. } => ErrorCategory::Device,
            RegsrvError::AlreadyConnected
            | RegsrvError::AlreadyActive
            | RegsrvError::AlreadyInProgress
            | RegsrvError::NotConnected
            | RegsrvError::Cancelled => ErrorCategory::State,
            RegsrvError::Config(_) => ErrorCategory::Configuration,
            RegsrvError::Internal(_) => ErrorCategory::Internal,
        }
    }
}

impl From<std::io::Error> for RegsrvError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => RegsrvError::Timeout(err.to_string()),
            _ => RegsrvError::ConnectionLost(err.to_string()),
        }
    }
}

impl From<figment::Error> for RegsrvError {
    fn from(err: figment::Error) -> Self {
        RegsrvError::Config(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_link_failures_force_disconnect() {
        assert!(RegsrvError::connection_lost("eof").is_link_failure());
        assert!(RegsrvError::timeout("read").is_link_failure());
        assert!(RegsrvError::connection_failed("refused").is_link_failure());
    }

    #[test]
    fn test_framing_and_device_errors_keep_link() {
        let framing = [
            RegsrvError::ChecksumError {
                received: 0x1234,
                calculated: 0x4321,
            },
            RegsrvError::malformed("short"),
            RegsrvError::TransactionMismatch {
                expected: 1,
                received: 2,
            },
            RegsrvError::UnexpectedFunctionCode {
                expected: 0x03,
                received: 0x04,
            },
            RegsrvError::DeviceException { code: 0x02 },
        ];
        for err in framing {
            assert!(!err.is_link_failure(), "{err} should keep the link");
        }
    }

    #[test]
    fn test_state_errors_are_not_logged_as_errors() {
        for err in [
            RegsrvError::AlreadyActive,
            RegsrvError::AlreadyInProgress,
            RegsrvError::NotConnected,
        ] {
            assert_eq!(err.category(), ErrorCategory::State);
            assert!(err.log_level() > tracing::Level::WARN);
        }
    }

    #[test]
    fn test_device_exception_message() {
        let err = RegsrvError::DeviceException { code: 0x02 };
        assert_eq!(
            err.to_string(),
            "Device exception 0x02 (Illegal Data Address)"
        );
        assert_eq!(err.error_code(), "DEVICE_EXCEPTION");
    }

    #[test]
    fn test_checksum_message() {
        let err = RegsrvError::ChecksumError {
            received: 0x0A84,
            calculated: 0x0B84,
        };
        assert!(err.to_string().contains("Checksum error"));
    }

    #[test]
    fn test_io_error_conversion() {
        let err: RegsrvError = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
        assert!(matches!(err, RegsrvError::Timeout(_)));

        let err: RegsrvError =
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert!(matches!(err, RegsrvError::ConnectionLost(_)));
    }
}

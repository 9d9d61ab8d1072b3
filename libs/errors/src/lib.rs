//! Shared error classification for the register reader services
//!
//! Every service keeps its own domain error enum and implements [`ErrorClass`]
//! on it. The trait gives callers a uniform way to decide whether a failure is
//! retryable, whether it tears the link down, and at which level it is logged.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ErrorCategory
// ============================================================================

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad caller input (out-of-range address, count, unit id)
    Validation,
    /// Socket could not be opened or was lost
    Connection,
    /// A socket operation exceeded its deadline
    Timeout,
    /// Bytes arrived but do not form a valid frame
    Framing,
    /// The device answered with a Modbus exception
    Device,
    /// Request rejected because of the current lifecycle state
    State,
    /// Invalid configuration
    Configuration,
    /// Everything else
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Framing => "framing",
            Self::Device => "device",
            Self::State => "state",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }

    /// Socket-level categories: the link can no longer be trusted
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ErrorClass trait
// ============================================================================

/// Error capability trait
///
/// Each service error type implements this to expose a stable machine code
/// and a category. The default methods derive behaviour from the category:
///
/// | category | retryable | forces disconnect | log level |
/// |----------|-----------|-------------------|-----------|
/// | Connection / Timeout | yes | yes | WARN |
/// | Framing / Device | no | no | WARN |
/// | State | no | no | DEBUG |
/// | Validation | no | no | INFO |
/// | Configuration / Internal | no | no | ERROR |
pub trait ErrorClass: std::error::Error + Send + Sync + 'static {
    /// Stable error code (for logs and result records)
    fn error_code(&self) -> &'static str;

    /// Error category
    fn category(&self) -> ErrorCategory;

    /// Whether a bounded connect sequence may try again after this error
    fn is_retryable(&self) -> bool {
        self.category().is_link_failure()
    }

    /// Whether the error means the socket must be torn down
    fn forces_disconnect(&self) -> bool {
        self.category().is_link_failure()
    }

    /// Get log level
    ///
    /// State rejections are normal outcomes and never reach WARN or ERROR.
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::State => Level::DEBUG,
            ErrorCategory::Validation => Level::INFO,
            ErrorCategory::Connection
            | ErrorCategory::Timeout
            | ErrorCategory::Framing
            | ErrorCategory::Device => Level::WARN,
            ErrorCategory::Configuration | ErrorCategory::Internal => Level::ERROR,
        }
    }

    /// Build the serializable record for result payloads
    fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.error_code().to_string(),
            category: self.category(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

// ============================================================================
// ErrorInfo - machine-checkable error record
// ============================================================================

/// Machine-checkable error kind carried next to a human message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable code, e.g. `CHECKSUM_ERROR`
    pub code: String,
    pub category: ErrorCategory,
    /// Human readable message
    pub message: String,
    pub retryable: bool,
}

/// Emit a tracing event at the level chosen by [`ErrorClass::log_level`]
///
/// `tracing` macros need a constant level, so this dispatches by hand.
pub fn log_classified<E: ErrorClass + ?Sized>(context: &str, err: &E) {
    use tracing::Level;
    let code = err.error_code();
    match err.log_level() {
        Level::ERROR => tracing::error!(code, "{}: {}", context, err),
        Level::WARN => tracing::warn!(code, "{}: {}", context, err),
        Level::INFO => tracing::info!(code, "{}: {}", context, err),
        Level::DEBUG => tracing::debug!(code, "{}: {}", context, err),
        Level::TRACE => tracing::trace!(code, "{}: {}", context, err),
    }
}

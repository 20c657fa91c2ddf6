//! Error types for wsassert.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use wsassert::{request, Result};
//!
//! async fn example(server: &TestServer) -> Result<()> {
//!     request(server).ws("/path/ws")?.expect_text("hello").close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Setup | [`Error::Config`], [`Error::InvalidUrl`], [`Error::ServerNotListening`] |
//! | Connection | [`Error::ConnectionFailed`], [`Error::Socket`], [`Error::NotOpen`], [`Error::SendOnClosed`] |
//! | Payload | [`Error::ExpectedText`], [`Error::ExpectedBinary`], [`Error::Json`], [`Error::PatternNotSupported`] |
//! | Expectation | [`Error::Mismatch`], [`Error::PredicateFailed`], [`Error::CloseMismatch`], [`Error::NoMessage`], ... |
//! | External | [`Error::Io`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// PayloadKind
// ============================================================================

/// Kind of payload carried by a received frame.
///
/// Used to render type mismatches such as "expected text, got binary".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// UTF-8 text frame.
    Text,
    /// Binary frame.
    Binary,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Binary => f.write_str("binary"),
        }
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Failures of pipeline steps surface as one of these variants when the
/// pipeline is awaited. The rendered message is the user-facing report.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Setup Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when a request or server is configured inconsistently.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Target URL could not be built.
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parser message.
        message: String,
    },

    /// Test server is not accepting connections.
    ///
    /// Returned when `.ws()` is called against a server that was never
    /// bound or was already closed.
    #[error("Server is not listening; make sure it is bound before opening a socket")]
    ServerNotListening,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Handshake failed before the connection opened.
    #[error("{message}")]
    ConnectionFailed {
        /// Transport message, e.g. `Unexpected server response: 404`.
        message: String,
    },

    /// Error reported by the transport after the connection opened.
    #[error("WebSocket error: {message}")]
    Socket {
        /// Transport message.
        message: String,
    },

    /// Send attempted while the handshake is still in progress.
    #[error("WebSocket is not open: still connecting")]
    NotOpen,

    /// Send attempted on a closing or closed connection.
    #[error("Cannot send message; connection closed with {code} \"{reason}\"")]
    SendOnClosed {
        /// Close code reported by the peer.
        code: u16,
        /// Close reason reported by the peer.
        reason: String,
    },

    // ========================================================================
    // Payload Errors
    // ========================================================================
    /// Expected a text frame.
    #[error("Expected text message, got {actual}")]
    ExpectedText {
        /// Kind actually received.
        actual: PayloadKind,
    },

    /// Expected a binary frame.
    #[error("Expected binary message, got {actual}")]
    ExpectedBinary {
        /// Kind actually received.
        actual: PayloadKind,
    },

    /// Regex expectation applied to a non-text payload.
    #[error("Pattern expectations only apply to text messages")]
    PatternNotSupported,

    // ========================================================================
    // Expectation Errors
    // ========================================================================
    /// Message did not equal the expected value.
    #[error("Expected message {expected}, got {actual}")]
    Mismatch {
        /// Rendered expected value.
        expected: String,
        /// Rendered received value.
        actual: String,
    },

    /// A predicate rejected the value.
    #[error("Expectation failed for {actual}{}", detail_suffix(.detail))]
    PredicateFailed {
        /// Rendered value given to the predicate.
        actual: String,
        /// Message returned by the predicate, if any.
        detail: Option<String>,
    },

    /// Close code or reason differed from the expectation.
    #[error("Expected close {field} {expected}, got {actual}")]
    CloseMismatch {
        /// `"code"` or `"reason"`.
        field: &'static str,
        /// Rendered expected value.
        expected: String,
        /// Rendered received value.
        actual: String,
    },

    /// No message arrived within the expectation timeout.
    #[error("Expected message within {timeout_ms}ms, but nothing arrived")]
    NoMessage {
        /// Milliseconds waited.
        timeout_ms: u64,
    },

    /// Connection closed while a message expectation was pending.
    #[error("Expected message, but connection closed with {code} \"{reason}\"")]
    ClosedWhileWaiting {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// Connection opened although a handshake failure was expected.
    #[error("Expected connection failure, but connected")]
    UnexpectedConnection,

    /// Handshake failed with a different error than expected.
    #[error("Expected connection failure {expected}, got {actual}")]
    ConnectionErrorMismatch {
        /// Rendered expected failure.
        expected: String,
        /// Actual failure message.
        actual: String,
    },

    /// Upgrade response rejected by a predicate.
    #[error("Upgrade expectation failed{}", detail_suffix(.detail))]
    UpgradeRejected {
        /// Message returned by the predicate, if any.
        detail: Option<String>,
    },

    /// A user callback reported failure.
    #[error("Step failed: {message}")]
    StepFailed {
        /// Message returned by the callback.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization or parse error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

/// Renders an optional predicate message as `": message"`.
fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!(": {d}"))
        .unwrap_or_default()
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    #[inline]
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a connection failure error.
    #[inline]
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    /// Creates a post-open socket error.
    #[inline]
    pub fn socket(message: impl Into<String>) -> Self {
        Self::Socket {
            message: message.into(),
        }
    }

    /// Creates a send-on-closed error.
    #[inline]
    pub fn send_on_closed(code: u16, reason: impl Into<String>) -> Self {
        Self::SendOnClosed {
            code,
            reason: reason.into(),
        }
    }

    /// Creates a value mismatch error.
    #[inline]
    pub fn mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::Mismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a predicate failure error.
    #[inline]
    pub fn predicate_failed(actual: impl Into<String>, detail: Option<String>) -> Self {
        Self::PredicateFailed {
            actual: actual.into(),
            detail,
        }
    }

    /// Creates a close mismatch error.
    #[inline]
    pub fn close_mismatch(
        field: &'static str,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::CloseMismatch {
            field,
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a closed-while-waiting error.
    #[inline]
    pub fn closed_while_waiting(code: u16, reason: impl Into<String>) -> Self {
        Self::ClosedWhileWaiting {
            code,
            reason: reason.into(),
        }
    }

    /// Creates a connection error mismatch.
    #[inline]
    pub fn connection_error_mismatch(
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ConnectionErrorMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a step failure error.
    #[inline]
    pub fn step_failed(message: impl Into<String>) -> Self {
        Self::StepFailed {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error comes from test setup.
    #[inline]
    #[must_use]
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::InvalidUrl { .. } | Self::ServerNotListening
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::Socket { .. }
                | Self::NotOpen
                | Self::SendOnClosed { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if a received payload had the wrong shape.
    #[inline]
    #[must_use]
    pub fn is_payload_error(&self) -> bool {
        matches!(
            self,
            Self::ExpectedText { .. }
                | Self::ExpectedBinary { .. }
                | Self::Json(_)
                | Self::PatternNotSupported
        )
    }

    /// Returns `true` if an expectation was not met.
    #[inline]
    #[must_use]
    pub fn is_expectation_failure(&self) -> bool {
        matches!(
            self,
            Self::Mismatch { .. }
                | Self::PredicateFailed { .. }
                | Self::CloseMismatch { .. }
                | Self::NoMessage { .. }
                | Self::ClosedWhileWaiting { .. }
                | Self::UnexpectedConnection
                | Self::ConnectionErrorMismatch { .. }
                | Self::UpgradeRejected { .. }
                | Self::StepFailed { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection_failed("Unexpected server response: 404");
        assert_eq!(err.to_string(), "Unexpected server response: 404");
    }

    #[test]
    fn test_send_on_closed_display() {
        let err = Error::send_on_closed(1001, "going away");
        assert_eq!(
            err.to_string(),
            "Cannot send message; connection closed with 1001 \"going away\""
        );
    }

    #[test]
    fn test_payload_kind_display() {
        let err = Error::ExpectedText {
            actual: PayloadKind::Binary,
        };
        assert_eq!(err.to_string(), "Expected text message, got binary");

        let err = Error::ExpectedBinary {
            actual: PayloadKind::Text,
        };
        assert_eq!(err.to_string(), "Expected binary message, got text");
    }

    #[test]
    fn test_predicate_failed_display() {
        let bare = Error::predicate_failed("\"foo\"", None);
        assert_eq!(bare.to_string(), "Expectation failed for \"foo\"");

        let detailed = Error::predicate_failed("\"foo\"", Some("too short".into()));
        assert_eq!(
            detailed.to_string(),
            "Expectation failed for \"foo\": too short"
        );
    }

    #[test]
    fn test_close_mismatch_shows_both_sides() {
        let err = Error::close_mismatch("code", "1000", "1001");
        assert_eq!(err.to_string(), "Expected close code 1000, got 1001");
    }

    #[test]
    fn test_is_setup_error() {
        assert!(Error::ServerNotListening.is_setup_error());
        assert!(Error::invalid_url("x", "bad").is_setup_error());
        assert!(!Error::NotOpen.is_setup_error());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection_failed("x").is_connection_error());
        assert!(Error::socket("x").is_connection_error());
        assert!(Error::NotOpen.is_connection_error());
        assert!(!Error::config("x").is_connection_error());
    }

    #[test]
    fn test_is_expectation_failure() {
        assert!(Error::mismatch("a", "b").is_expectation_failure());
        assert!(Error::NoMessage { timeout_ms: 50 }.is_expectation_failure());
        assert!(!Error::NotOpen.is_expectation_failure());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert!(err.is_payload_error());
    }
}

//! Connection-level frame metadata.
//!
//! Types describing the observable state of a socket: its ready state,
//! the close event, and the handshake (upgrade) response.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio_tungstenite::tungstenite::handshake::client::Response;
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

// ============================================================================
// Constants
// ============================================================================

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close frame carried no status code.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

// ============================================================================
// ReadyState
// ============================================================================

/// Lifecycle state of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyState {
    /// Handshake in progress.
    #[default]
    Connecting,
    /// Handshake completed, frames flow both ways.
    Open,
    /// A close frame was sent or received.
    Closing,
    /// Transport shut down.
    Closed,
}

impl ReadyState {
    /// Returns `true` while the connection is connecting or open.
    #[inline]
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

// ============================================================================
// CloseInfo
// ============================================================================

/// Close code and reason observed when a connection ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close status code.
    pub code: u16,
    /// Close reason (may be empty).
    pub reason: String,
}

impl CloseInfo {
    /// Creates close info from a code and reason.
    #[inline]
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Close info for a transport that ended without a close frame.
    #[inline]
    #[must_use]
    pub fn abnormal() -> Self {
        Self::new(CLOSE_ABNORMAL, "")
    }

    /// Builds close info from a received close frame.
    ///
    /// A frame without a status maps to code 1005.
    #[must_use]
    pub fn from_frame(frame: Option<&CloseFrame>) -> Self {
        match frame {
            Some(frame) => Self::new(u16::from(frame.code), frame.reason.as_str()),
            None => Self::new(CLOSE_NO_STATUS, ""),
        }
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\"", self.code, self.reason)
    }
}

// ============================================================================
// UpgradeResponse
// ============================================================================

/// HTTP response that completed the WebSocket handshake.
#[derive(Debug, Clone)]
pub struct UpgradeResponse {
    status: StatusCode,
    headers: HeaderMap,
}

impl UpgradeResponse {
    /// Returns the HTTP status (normally `101 Switching Protocols`).
    #[inline]
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns all response headers.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the subprotocol selected by the server.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.header("sec-websocket-protocol")
    }
}

impl From<&Response> for UpgradeResponse {
    fn from(response: &Response) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_tungstenite::tungstenite::http;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn test_ready_state_is_active() {
        assert!(ReadyState::Connecting.is_active());
        assert!(ReadyState::Open.is_active());
        assert!(!ReadyState::Closing.is_active());
        assert!(!ReadyState::Closed.is_active());
    }

    #[test]
    fn test_close_info_from_frame() {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "bye".into(),
        };
        let info = CloseInfo::from_frame(Some(&frame));
        assert_eq!(info, CloseInfo::new(1001, "bye"));
    }

    #[test]
    fn test_close_info_without_status() {
        let info = CloseInfo::from_frame(None);
        assert_eq!(info.code, CLOSE_NO_STATUS);
        assert!(info.reason.is_empty());
    }

    #[test]
    fn test_close_info_display() {
        assert_eq!(CloseInfo::new(4000, "custom").to_string(), "4000 \"custom\"");
        assert_eq!(CloseInfo::abnormal().to_string(), "1006 \"\"");
    }

    #[test]
    fn test_upgrade_response_headers() {
        let response: Response = http::Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header("Sec-WebSocket-Protocol", "chat")
            .header("X-Custom", "yes")
            .body(None)
            .unwrap();

        let upgrade = UpgradeResponse::from(&response);
        assert_eq!(upgrade.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(upgrade.protocol(), Some("chat"));
        assert_eq!(upgrade.header("x-custom"), Some("yes"));
        assert_eq!(upgrade.header("missing"), None);
    }
}

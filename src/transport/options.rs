//! Handshake options for client connections.
//!
//! # Example
//!
//! ```ignore
//! use wsassert::WsOptions;
//!
//! let options = WsOptions::new()
//!     .with_protocol("chat")
//!     .with_header("Authorization", "Bearer token");
//! ```

// ============================================================================
// Imports
// ============================================================================

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

use crate::error::{Error, Result};

// ============================================================================
// WsOptions
// ============================================================================

/// Options applied to the WebSocket handshake request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WsOptions {
    /// Requested subprotocols, in preference order.
    pub protocols: Vec<String>,

    /// Extra request headers.
    pub headers: Vec<(String, String)>,
}

// ============================================================================
// Constructors
// ============================================================================

impl WsOptions {
    /// Creates empty options.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            protocols: Vec::new(),
            headers: Vec::new(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl WsOptions {
    /// Requests a subprotocol.
    #[inline]
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Requests several subprotocols.
    #[inline]
    #[must_use]
    pub fn with_protocols(mut self, protocols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.protocols.extend(protocols.into_iter().map(Into::into));
        self
    }

    /// Adds a request header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

// ============================================================================
// Conversion Methods
// ============================================================================

impl WsOptions {
    /// Builds the handshake request for `url`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if `url` is not a valid WebSocket URL
    /// - [`Error::Config`] if a header name or value is invalid
    pub(crate) fn build_request(&self, url: &str) -> Result<Request> {
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::invalid_url(url, e.to_string()))?;

        if !self.protocols.is_empty() {
            let value = HeaderValue::from_str(&self.protocols.join(", "))
                .map_err(|e| Error::config(format!("Invalid subprotocol: {e}")))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::config(format!("Invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::config(format!("Invalid header value for '{name}': {e}")))?;
            request.headers_mut().append(name, value);
        }

        Ok(request)
    }
}

// ============================================================================
// Tests
// ============================================================================

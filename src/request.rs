//! Entry point: turns a server or base URL into socket pipelines.
//!
//! # Example
//!
//! ```ignore
//! use wsassert::{RequestOptions, request, request_with};
//!
//! // Local test server
//! request(&server).ws("/path/ws")?.expect_text("hello").close().await?;
//!
//! // Remote server; http(s) is rewritten to ws(s)
//! request("http://localhost:8080").ws("/feed")?.expect_json(Expectation::any()).await?;
//!
//! // Give server peers time to close on their own at shutdown
//! request_with(&server, RequestOptions::new().with_shutdown_delay(Duration::from_millis(200)));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::pipeline::{Fresh, WsPipeline};
use crate::server::TestServer;
use crate::transport::{Connection, WsOptions};

// ============================================================================
// RequestOptions
// ============================================================================

/// Options for [`request_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Grace period server peers get when the server closes.
    ///
    /// Merged by maximum with earlier requests against the same server.
    /// Ignored for URL targets.
    pub shutdown_delay: Duration,
}

impl RequestOptions {
    /// Creates options with no shutdown delay.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the shutdown delay.
    #[inline]
    #[must_use]
    pub fn with_shutdown_delay(mut self, delay: Duration) -> Self {
        self.shutdown_delay = delay;
        self
    }
}

// ============================================================================
// Target
// ============================================================================

/// What a [`TestRequest`] connects to.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    /// A local test server.
    Server(&'a TestServer),
    /// A base URL (`http`, `https`, `ws` or `wss`).
    Url(&'a str),
}

impl<'a> From<&'a TestServer> for Target<'a> {
    fn from(server: &'a TestServer) -> Self {
        Self::Server(server)
    }
}

impl<'a> From<&'a str> for Target<'a> {
    fn from(url: &'a str) -> Self {
        Self::Url(url)
    }
}

impl<'a> From<&'a String> for Target<'a> {
    fn from(url: &'a String) -> Self {
        Self::Url(url)
    }
}

// ============================================================================
// Entry Points
// ============================================================================

/// Starts a request against a server or base URL.
#[must_use]
pub fn request<'a>(target: impl Into<Target<'a>>) -> TestRequest<'a> {
    request_with(target, RequestOptions::default())
}

/// Starts a request with options.
///
/// A server target's shutdown delay is raised to `options.shutdown_delay`
/// right away.
#[must_use]
pub fn request_with<'a>(target: impl Into<Target<'a>>, options: RequestOptions) -> TestRequest<'a> {
    let target = target.into();

    if let Target::Server(server) = target
        && !options.shutdown_delay.is_zero()
    {
        server.apply_shutdown_delay(options.shutdown_delay);
    }

    TestRequest { target }
}

// ============================================================================
// TestRequest
// ============================================================================

/// Request builder returned by [`request`].
#[derive(Debug, Clone, Copy)]
pub struct TestRequest<'a> {
    target: Target<'a>,
}

impl TestRequest<'_> {
    /// Returns the socket URL for `path`.
    ///
    /// # Errors
    ///
    /// - [`Error::ServerNotListening`] if the server was closed
    /// - [`Error::InvalidUrl`] if the result is not a `ws`/`wss` URL
    pub fn url(&self, path: &str) -> Result<String> {
        let base = match self.target {
            Target::Server(server) => server.ws_url()?,
            Target::Url(url) => rewrite_scheme(url),
        };

        let url = format!("{base}{path}");
        let parsed = Url::parse(&url).map_err(|e| Error::invalid_url(&url, e.to_string()))?;

        match parsed.scheme() {
            "ws" | "wss" => Ok(url),
            scheme => Err(Error::invalid_url(
                &url,
                format!("unsupported scheme '{scheme}'"),
            )),
        }
    }

    /// Opens a socket to `path` and returns its pipeline.
    ///
    /// The handshake starts immediately.
    ///
    /// # Errors
    ///
    /// See [`TestRequest::url`].
    pub fn ws(&self, path: &str) -> Result<WsPipeline<Fresh>> {
        self.ws_with(path, &WsOptions::default())
    }

    /// Opens a socket with subprotocols or extra handshake headers.
    ///
    /// # Errors
    ///
    /// See [`TestRequest::url`]; [`Error::Config`] for invalid headers.
    pub fn ws_with(&self, path: &str, options: &WsOptions) -> Result<WsPipeline<Fresh>> {
        let url = self.url(path)?;
        debug!(%url, "Opening pipeline");

        let connection = Connection::open(&url, options)?;
        Ok(WsPipeline::start(connection))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Rewrites an `http`/`https` prefix to `ws`/`wss`.
fn rewrite_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        url.to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================

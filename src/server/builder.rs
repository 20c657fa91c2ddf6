//! Builder for test servers.
//!
//! # Example
//!
//! ```ignore
//! use wsassert::{ServerPeer, TestServer};
//!
//! let server = TestServer::builder()
//!     .route("/path/ws", |mut peer: ServerPeer| async move {
//!         peer.send_text("hello").await.ok();
//!     })
//!     .reject("/private", 403)
//!     .bind()
//!     .await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use futures_util::FutureExt;
use rustc_hash::FxHashMap;
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::error::{Error, Result};

use super::core::{Handler, Route, TestServer};
use super::peer::ServerPeer;

// ============================================================================
// Constants
// ============================================================================

/// Default bind address (localhost, random port).
const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);

// ============================================================================
// TestServerBuilder
// ============================================================================

/// Builder for configuring a [`TestServer`].
///
/// Use [`TestServer::builder()`] to create a new builder.
pub struct TestServerBuilder {
    /// Address to bind to.
    addr: SocketAddr,
    /// Routes by exact request path.
    routes: FxHashMap<String, PendingRoute>,
    /// Handler for paths without a route.
    fallback: Option<Handler>,
}

/// Route as configured, validated at bind time.
enum PendingRoute {
    Accept(Handler),
    Reject(u16),
}

impl Default for TestServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TestServerBuilder Implementation
// ============================================================================

impl TestServerBuilder {
    /// Creates a builder bound to `127.0.0.1:0` with no routes.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            addr: DEFAULT_BIND_ADDR,
            routes: FxHashMap::default(),
            fallback: None,
        }
    }

    /// Sets the bind address.
    ///
    /// Use port 0 to let the OS assign a random available port.
    #[inline]
    #[must_use]
    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Accepts sockets on `path` and runs `handler` for each of them.
    #[must_use]
    pub fn route<F, Fut>(mut self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ServerPeer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.routes
            .insert(path.into(), PendingRoute::Accept(into_handler(handler)));
        self
    }

    /// Rejects handshakes on `path` with the given HTTP status.
    #[must_use]
    pub fn reject(mut self, path: impl Into<String>, status: u16) -> Self {
        self.routes.insert(path.into(), PendingRoute::Reject(status));
        self
    }

    /// Accepts sockets on every path without an explicit route.
    ///
    /// Without a fallback, unknown paths are rejected with 404.
    #[must_use]
    pub fn fallback<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ServerPeer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.fallback = Some(into_handler(handler));
        self
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a rejection status is not a valid HTTP status
    /// - [`Error::Io`] if binding fails
    pub async fn bind(self) -> Result<TestServer> {
        let mut routes = FxHashMap::default();
        for (path, route) in self.routes {
            let route = match route {
                PendingRoute::Accept(handler) => Route::Accept(handler),
                PendingRoute::Reject(status) => {
                    let status = StatusCode::from_u16(status).map_err(|_| {
                        Error::config(format!("Invalid rejection status {status} for '{path}'"))
                    })?;
                    Route::Reject(status)
                }
            };
            routes.insert(path, route);
        }

        TestServer::start(self.addr, routes, self.fallback).await
    }
}

/// Boxes a handler closure.
fn into_handler<F, Fut>(handler: F) -> Handler
where
    F: Fn(ServerPeer) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |peer| handler(peer).boxed())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_localhost() {
        let builder = TestServerBuilder::new();
        assert_eq!(builder.addr, DEFAULT_BIND_ADDR);
        assert!(builder.routes.is_empty());
        assert!(builder.fallback.is_none());
    }

    #[test]
    fn test_route_and_reject_register_paths() {
        let builder = TestServerBuilder::new()
            .route("/a", |_peer| async {})
            .reject("/b", 403);

        assert!(matches!(builder.routes.get("/a"), Some(PendingRoute::Accept(_))));
        assert!(matches!(builder.routes.get("/b"), Some(PendingRoute::Reject(403))));
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_status() {
        let result = TestServerBuilder::new().reject("/x", 42).bind().await;
        let err = result.err().expect("invalid status should fail");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_bind_random_port() {
        let server = TestServerBuilder::new()
            .fallback(|_peer| async {})
            .bind()
            .await
            .expect("bind should succeed");

        assert!(server.port() > 0);
        server.close().await;
    }
}

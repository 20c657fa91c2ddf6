//! Local WebSocket server for driving pipelines in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 TestServer                    │
//! │            (single port, loopback)            │
//! │  accept loop ──► route by path                │
//! │                   ├─ handler  → PeerId=1 task │
//! │                   ├─ handler  → PeerId=2 task │
//! │                   └─ reject   → HTTP status   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! # Shutdown
//!
//! [`TestServer::close`] stops accepting, then gives every peer task the
//! configured grace period (polled every 10ms) to finish before aborting
//! it. Aborted peers drop their socket without a closing handshake, which
//! clients observe as code 1006.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderValue, StatusCode};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::PeerId;

use super::builder::TestServerBuilder;
use super::peer::ServerPeer;

// ============================================================================
// Constants
// ============================================================================

/// Interval at which shutdown checks whether peers finished.
pub const PEER_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Types
// ============================================================================

/// Boxed route handler.
pub(crate) type Handler = Arc<dyn Fn(ServerPeer) -> BoxFuture<'static, ()> + Send + Sync>;

/// What the server does with a handshake on a path.
pub(crate) enum Route {
    /// Accept and run the handler.
    Accept(Handler),
    /// Refuse with an HTTP status.
    Reject(StatusCode),
}

/// State shared with the accept loop and peer tasks.
struct ServerInner {
    /// Bound address.
    local_addr: SocketAddr,

    /// Routes by exact path.
    routes: FxHashMap<String, Route>,

    /// Handler for unrouted paths.
    fallback: Option<Handler>,

    /// Cleared by close.
    listening: AtomicBool,

    /// Wakes the accept loop on close.
    shutdown: Notify,

    /// Grace period peers get on close.
    shutdown_delay: Mutex<Duration>,

    /// Running peer tasks.
    peers: Mutex<FxHashMap<PeerId, AbortHandle>>,
}

// ============================================================================
// TestServer
// ============================================================================

/// WebSocket server bound to a loopback port.
///
/// Pass it to [`request`](crate::request) to drive pipelines against it.
/// Dropping the server aborts its peers without a grace period.
///
/// # Example
///
/// ```ignore
/// let server = TestServer::bind(|mut peer: ServerPeer| async move {
///     while let Some(message) = peer.recv().await {
///         peer.send(message).await.ok();
///     }
/// })
/// .await?;
///
/// request(&server).ws("/echo")?.send_text("hi").expect_text("hi").close().await?;
/// server.close().await;
/// ```
pub struct TestServer {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for TestServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestServer")
            .field("local_addr", &self.inner.local_addr)
            .field("listening", &self.is_listening())
            .field("peers", &self.peer_count())
            .finish()
    }
}

// ============================================================================
// TestServer - Constructor
// ============================================================================

impl TestServer {
    /// Creates a builder for configuring routes.
    #[inline]
    #[must_use]
    pub fn builder() -> TestServerBuilder {
        TestServerBuilder::new()
    }

    /// Binds `127.0.0.1:0` and runs `handler` for sockets on any path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind<F, Fut>(handler: F) -> Result<Self>
    where
        F: Fn(ServerPeer) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        TestServerBuilder::new().fallback(handler).bind().await
    }

    /// Binds the listener and spawns the accept loop.
    pub(crate) async fn start(
        addr: SocketAddr,
        routes: FxHashMap<String, Route>,
        fallback: Option<Handler>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let inner = Arc::new(ServerInner {
            local_addr,
            routes,
            fallback,
            listening: AtomicBool::new(true),
            shutdown: Notify::new(),
            shutdown_delay: Mutex::new(Duration::ZERO),
            peers: Mutex::new(FxHashMap::default()),
        });

        tokio::spawn(accept_loop(Arc::downgrade(&inner), listener));

        info!(%local_addr, "Test server started");

        Ok(Self { inner })
    }
}

// ============================================================================
// TestServer - Public API
// ============================================================================

impl TestServer {
    /// Returns the `ws://` base URL of the server.
    ///
    /// Unspecified bind addresses are reported as loopback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerNotListening`] after [`TestServer::close`].
    pub fn ws_url(&self) -> Result<String> {
        if !self.is_listening() {
            return Err(Error::ServerNotListening);
        }

        let mut addr = self.inner.local_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }

        Ok(format!("ws://{addr}"))
    }

    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.local_addr.port()
    }

    /// Returns `true` until the server is closed.
    #[inline]
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::Acquire)
    }

    /// Returns the number of peer tasks still running.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.inner
            .peers
            .lock()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Returns the grace period peers will get on close.
    #[must_use]
    pub fn shutdown_delay(&self) -> Duration {
        *self.inner.shutdown_delay.lock()
    }

    /// Raises the grace period to at least `delay`.
    ///
    /// Requests against the same server merge their delays by maximum.
    pub(crate) fn apply_shutdown_delay(&self, delay: Duration) {
        let mut current = self.inner.shutdown_delay.lock();
        if delay > *current {
            *current = delay;
        }
    }

    /// Stops accepting and shuts down every peer.
    ///
    /// Peers get the configured grace period to finish on their own; any
    /// still running afterwards are aborted. The grace period resets to
    /// zero. Closing an already closed server does nothing.
    pub async fn close(&self) {
        if !self.inner.listening.swap(false, Ordering::AcqRel) {
            debug!("Test server already closed");
            return;
        }

        self.inner.shutdown.notify_one();

        let grace = std::mem::take(&mut *self.inner.shutdown_delay.lock());
        let peers: Vec<_> = self.inner.peers.lock().drain().collect();

        info!(
            port = self.port(),
            peers = peers.len(),
            grace_ms = grace.as_millis() as u64,
            "Closing test server"
        );

        join_all(
            peers
                .into_iter()
                .map(|(peer_id, handle)| terminate_peer(peer_id, handle, grace)),
        )
        .await;

        debug!(port = self.port(), "Test server closed");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if !self.inner.listening.swap(false, Ordering::AcqRel) {
            return;
        }

        self.inner.shutdown.notify_one();
        for (_, handle) in self.inner.peers.lock().drain() {
            handle.abort();
        }
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

/// Accepts TCP connections until the server closes.
async fn accept_loop(inner: Weak<ServerInner>, listener: TcpListener) {
    loop {
        let Some(server) = inner.upgrade() else {
            break;
        };

        tokio::select! {
            () = server.shutdown.notified() => {
                debug!("Accept loop shutting down");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        debug!(?addr, "Incoming TCP connection");
                        tokio::spawn(handle_connection(Arc::clone(&server), stream));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
        }
    }
}

/// Runs the handshake for one TCP connection and starts its peer task.
async fn handle_connection(server: Arc<ServerInner>, stream: TcpStream) {
    let mut handler: Option<Handler> = None;
    let mut path = String::new();
    let mut headers = HeaderMap::new();

    let callback = |request: &Request,
                    mut response: Response|
     -> std::result::Result<Response, ErrorResponse> {
        path = request.uri().path().to_string();
        headers = request.headers().clone();

        match server.resolve(&path) {
            Route::Accept(route_handler) => {
                handler = Some(route_handler);
                if let Some(value) = first_protocol(request.headers()) {
                    response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
                }
                Ok(response)
            }
            Route::Reject(status) => Err(error_response(status)),
        }
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            debug!(error = %e, "Handshake rejected");
            return;
        }
    };

    let Some(handler) = handler else {
        return;
    };

    let peer_id = PeerId::next();
    let peer = ServerPeer::new(peer_id, path.clone(), headers, ws_stream);
    let weak = Arc::downgrade(&server);

    // Close flips `listening` before draining under this lock, so a peer
    // registered here is always seen by the drain
    let mut peers = server.peers.lock();
    if !server.listening.load(Ordering::Acquire) {
        warn!(%path, "Connection accepted during shutdown, dropping");
        return;
    }

    debug!(%peer_id, %path, "Peer connected");

    let task = tokio::spawn(async move {
        handler(peer).await;
        if let Some(server) = weak.upgrade() {
            server.peers.lock().remove(&peer_id);
        }
        debug!(%peer_id, "Peer finished");
    });
    peers.insert(peer_id, task.abort_handle());
}

impl ServerInner {
    /// Decides what to do with a handshake on `path`.
    ///
    /// Exact routes win over the fallback; without either the path is 404.
    fn resolve(&self, path: &str) -> Route {
        match self.routes.get(path) {
            Some(Route::Accept(handler)) => Route::Accept(Arc::clone(handler)),
            Some(Route::Reject(status)) => Route::Reject(*status),
            None => match &self.fallback {
                Some(handler) => Route::Accept(Arc::clone(handler)),
                None => Route::Reject(StatusCode::NOT_FOUND),
            },
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Waits up to `grace` for a peer to finish, then aborts it.
async fn terminate_peer(peer_id: PeerId, handle: AbortHandle, grace: Duration) {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() && Instant::now() < deadline {
        sleep(PEER_POLL_INTERVAL).await;
    }

    if !handle.is_finished() {
        debug!(%peer_id, "Aborting peer");
        handle.abort();
    }
}

/// Builds an HTTP rejection for a handshake.
fn error_response(status: StatusCode) -> ErrorResponse {
    let mut response = ErrorResponse::new(None);
    *response.status_mut() = status;
    response
}

/// Picks the first subprotocol the client offered.
fn first_protocol(headers: &HeaderMap) -> Option<HeaderValue> {
    let offered = headers.get(SEC_WEBSOCKET_PROTOCOL)?.to_str().ok()?;
    let first = offered.split(',').next()?.trim();
    if first.is_empty() {
        return None;
    }
    HeaderValue::from_str(first).ok()
}

// ============================================================================
// Tests
// ============================================================================

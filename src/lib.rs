//! wsassert - Fluent WebSocket assertions for async tests.
//!
//! This library opens client sockets against a local [`TestServer`] or a
//! remote URL and drives them through a chain of sends and expectations
//! that runs strictly in call order.
//!
//! # Architecture
//!
//! ```text
//! request(&server).ws("/path")
//!          │
//!          ▼
//! ┌──────────────────┐   steps   ┌──────────────┐   commands   ┌──────────────┐
//! │  WsPipeline      │──────────►│  Runner task │─────────────►│  Event loop  │◄──► server
//! │  (typestate)     │           │  (one/step)  │◄─────────────│  (tokio task)│
//! └──────────────────┘           └──────────────┘ queue/signals└──────────────┘
//! ```
//!
//! Key design principles:
//!
//! - Each [`Connection`] owns one event loop task; received frames land in a
//!   cancel-safe [`BlockingQueue`]
//! - Steps never overlap and every step races the first post-open error
//! - A failing step closes the connection and skips the rest of the chain
//! - Awaiting a pipeline yields the [`Connection`], never a step's value
//!
//! # Quick Start
//!
//! ```no_run
//! use wsassert::{Result, ServerPeer, TestServer, request};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = TestServer::builder()
//!         .route("/path/ws", |mut peer: ServerPeer| async move {
//!             peer.send_text("hello").await.ok();
//!             while let Some(text) = peer.recv_text().await {
//!                 peer.send_text(format!("echo {text}")).await.ok();
//!             }
//!         })
//!         .bind()
//!         .await?;
//!
//!     request(&server)
//!         .ws("/path/ws")?
//!         .expect_text("hello")
//!         .send_text("foo")
//!         .expect_text("echo foo")
//!         .close()
//!         .expect_closed(None, None)
//!         .await?;
//!
//!     server.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`expectation`] | Payload expectations and options |
//! | [`identifiers`] | Connection and peer IDs |
//! | [`pipeline`] | Chainable step pipelines |
//! | [`protocol`] | Close events, ready state, payload decoding |
//! | [`queue`] | Async FIFO queue and one-shot signal |
//! | [`request`](mod@request) | Entry points and URL resolution |
//! | [`server`] | Local test server |
//! | [`transport`] | Client connections and registry |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Expectations checked against received payloads.
pub mod expectation;

/// Type-safe identifiers for connections and server peers.
pub mod identifiers;

/// Chainable step pipelines.
///
/// Use [`request`] to create one.
pub mod pipeline;

/// Close events, ready state and payload decoding.
pub mod protocol;

/// Async FIFO queue and one-shot signal.
pub mod queue;

/// Entry points and URL resolution.
pub mod request;

/// Local WebSocket server for tests.
pub mod server;

/// Client WebSocket transport layer.
///
/// Handles the socket event loop and the process-wide client registry.
pub mod transport;

#[cfg(test)]
mod test_support;

// ============================================================================
// Re-exports
// ============================================================================

// Entry points
pub use request::{RequestOptions, Target, TestRequest, request, request_with};

// Pipeline types
pub use pipeline::{Chainable, Chained, Fresh, Rejected, WsPipeline};

// Expectation types
pub use expectation::{ExpectOptions, ExpectedConnectionError, Expectation, IntoVerdict};

// Transport types
pub use transport::{Connection, WsOptions, close_all_clients, open_client_count};

// Server types
pub use server::{ServerPeer, TestServer, TestServerBuilder};

// Protocol types
pub use protocol::{CloseInfo, Payload, ReadyState, UpgradeResponse};

// Error types
pub use error::{Error, PayloadKind, Result};

// Identifier types
pub use identifiers::{ConnectionId, PeerId};

// Queue types
pub use queue::{BlockingQueue, Signal};

// Frame type used by `send` and `Connection::messages`
pub use tokio_tungstenite::tungstenite::Message;

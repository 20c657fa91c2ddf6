//! Client WebSocket transport layer.
//!
//! This module owns the client side of every socket opened by a pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   commands    ┌──────────────┐   WebSocket   ┌──────────────┐
//! │  Connection      │──────────────►│  Event loop  │◄─────────────►│  Server      │
//! │  (cloneable)     │◄──────────────│  (tokio task)│               │  under test  │
//! └──────────────────┘ queue/signals └──────────────┘               └──────────────┘
//!          │
//!          ▼
//!   open client registry (process-wide, weak)
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connection::open` - Register and spawn the handshake
//! 2. `Connection::ready` - Observe the handshake outcome
//! 3. `Connection::send` / `messages()` - Exchange frames
//! 4. `Connection::close` - Start the closing handshake
//! 5. `Connection::closed` - Observe the close event
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Client connection and event loop |
//! | `options` | Handshake request options |
//! | `registry` | Open client registry and bulk close |

// ============================================================================
// Submodules
// ============================================================================

/// Client connection and event loop.
pub mod connection;

/// Handshake request options.
pub mod options;

/// Process-wide registry of open client connections.
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::Connection;
pub use options::WsOptions;
pub use registry::{close_all_clients, open_client_count};

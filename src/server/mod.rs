//! Local WebSocket server for tests.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Route configuration and binding |
//! | `core` | Accept loop, routing and shutdown |
//! | `peer` | Server side of one accepted socket |

// ============================================================================
// Submodules
// ============================================================================

/// Route configuration and binding.
pub mod builder;

/// Accept loop, routing and shutdown.
pub mod core;

/// Server side of one accepted socket.
pub mod peer;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::TestServerBuilder;
pub use self::core::{PEER_POLL_INTERVAL, TestServer};
pub use peer::ServerPeer;

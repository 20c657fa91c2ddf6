//! Chainable step pipelines over one client connection.
//!
//! Each [`WsPipeline`] owns a runner task that executes queued steps one
//! at a time. Every step races the connection's first post-open error, so
//! a broken socket interrupts even an unrelated `wait`.
//!
//! # Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | Pipeline struct, typestate and runner |
//! | `send` | Send steps |
//! | `expect` | Message expectations |
//! | `lifecycle` | Close, upgrade, wait and exec steps |
//! | `connection_error` | Handshake failure assertion |
//!
//! # Typestate
//!
//! ```text
//! ws() ──► WsPipeline<Fresh> ──step──► WsPipeline<Chained> ──step──► ...
//!                │
//!                └─expect_connection_error──► WsPipeline<Rejected>
//! ```

// ============================================================================
// Submodules
// ============================================================================

mod connection_error;
mod core;
mod expect;
mod lifecycle;
mod send;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{Chainable, Chained, Fresh, Rejected, WsPipeline};

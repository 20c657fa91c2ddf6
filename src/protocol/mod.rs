//! Socket frame metadata and payload decoding.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Ready state, close info, upgrade response |
//! | `payload` | Text / binary / JSON decoding of received frames |

// ============================================================================
// Submodules
// ============================================================================

/// Ready state, close event and handshake response types.
pub mod frame;

/// Decoding of received frames into typed payloads.
pub mod payload;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{
    CLOSE_ABNORMAL, CLOSE_NO_STATUS, CLOSE_NORMAL, CloseInfo, ReadyState, UpgradeResponse,
};
pub use payload::Payload;

//! Protocol frame codec.
//!
//! # Frame Kinds
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `o` | Server → Client | Session opened |
//! | `a[...]` | Server → Client | Batch of application messages |
//! | `h` | Server → Client | Heartbeat |
//! | `c[code,"reason"]` | Server → Client | Session closed |
//!
//! Client → server payloads are plain JSON arrays of strings and are
//! handled by [`Session::push_inbound_json`](crate::Session::push_inbound_json).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame type, encode/decode, reserved close values |
//! | `escape` | Selective escaping for eventsource streams |

// ============================================================================
// Submodules
// ============================================================================

/// Selective percent-escaping.
pub mod escape;

/// Frame definitions.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use escape::{escape, unescape};
pub use frame::{
    ANOTHER_CONNECTION_CODE, ANOTHER_CONNECTION_REASON, CloseInfo, Frame, GO_AWAY_CODE,
    GO_AWAY_REASON, INTERRUPTED_CODE, INTERRUPTED_REASON, coalesce_head,
};

//! Sessions and the machinery that serves them.
//!
//! # Lifecycle
//!
//! ```text
//!  connection ──► AttachCoordinator ──► Registry::get_or_create
//!                        │
//!                        ▼
//!            Session::attach_receiver ──► Rejected(close frame)
//!                        │
//!                        ▼
//!              Attachment::run (frames, heartbeats)
//!                        │
//!                        ▼
//!            Session::detach_receiver (buffer until next attach)
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `state` | [`SessionState`] machine |
//! | `core` | [`Session`]: queue, receiver slot, close signal |
//! | `attachment` | [`Attachment`] driver loop |
//! | `registry` | [`Registry`] of live sessions |
//! | `coordinator` | [`AttachCoordinator`] entry point for transports |

// ============================================================================
// Submodules
// ============================================================================

mod attachment;
mod coordinator;
mod core;
mod registry;
mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use attachment::{Attachment, DetachReason};
pub use coordinator::{AttachCoordinator, ServeOutcome};
pub use core::{AttachOutcome, Session};
pub use registry::Registry;
pub use state::SessionState;

pub(crate) use coordinator::reject;

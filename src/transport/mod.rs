//! Receivers: the per-connection side of a session.
//!
//! Each transport turns protocol frames into its own wire envelope. HTTP
//! receivers write into any [`AsyncWrite`](tokio::io::AsyncWrite) response
//! body, so they work with whatever server framework hosts them.
//!
//! # Wire Formats
//!
//! | Receiver | Prelude | Per frame | Limit |
//! |----------|---------|-----------|-------|
//! | [`EventSourceReceiver`] | `\r\n` | `data: <escaped>\r\n\r\n` | yes |
//! | [`XhrStreamingReceiver`] | 2048 × `h` + `\n` | `<text>\n` | yes |
//! | [`PollingReceiver`] | - | `<text>\n`, once | - |
//! | [`WebSocketReceiver`] | - | one text message | - |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `receiver` | [`Receiver`] trait and [`ReceiverKind`] |
//! | `eventsource` | `text/event-stream` receiver |
//! | `streaming` | XHR streaming receiver |
//! | `polling` | XHR polling receiver |
//! | `websocket` | WebSocket receiver and server glue |

// ============================================================================
// Submodules
// ============================================================================

/// Receiver trait and transport kinds.
pub mod receiver;

/// Eventsource receiver and event encoding.
pub mod eventsource;

/// XHR streaming receiver.
pub mod streaming;

/// XHR polling receiver.
pub mod polling;

/// WebSocket receiver and connection serving.
pub mod websocket;

mod stream;

// ============================================================================
// Re-exports
// ============================================================================

pub use eventsource::EventSourceReceiver;
pub use polling::PollingReceiver;
pub use receiver::{Receiver, ReceiverKind};
pub use streaming::XhrStreamingReceiver;
pub use websocket::{WebSocketReceiver, accept, serve_websocket};

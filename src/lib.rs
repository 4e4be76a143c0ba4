//! SockJS-style session core for HTTP fallback transports.
//!
//! A client keeps one logical *session* alive across a sequence of HTTP
//! requests (or one WebSocket). Each request is a *receiver* that the
//! session writes protocol frames into; between receivers the session
//! buffers outbound messages.
//!
//! # Architecture
//!
//! - **Frame codec**: `o`, `a[...]`, `h`, `c[code,"reason"]` text frames
//! - **Receivers**: eventsource, XHR streaming, XHR polling, WebSocket
//! - **Session**: state machine, FIFO outbound queue, single receiver slot
//! - **Registry + coordinator**: find-or-create by id, one receiver per
//!   session, conflicts answered with `c[2010,"Another connection still open"]`
//!
//! Key design principles:
//!
//! - At most one receiver attached per session
//! - States only advance: `Opening → Active → Closing → Closed`
//! - A frame leaves the queue only after it was written successfully
//! - Attach conflicts are answered in-band, never as errors
//!
//! # Quick Start
//!
//! ```no_run
//! use sockjs_session::{AttachCoordinator, EventSourceReceiver, Registry, SessionId, SessionOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn handle(body: tokio::io::DuplexStream) -> sockjs_session::Result<()> {
//! let registry = Registry::new(SessionOptions::new())?;
//! let coordinator = AttachCoordinator::new(registry.clone());
//!
//! // Application side: one handler per new session, announced from the
//! // first `accept` call on.
//! tokio::spawn(async move {
//!     while let Some(session) = registry.accept().await {
//!         let _ = session.enqueue_message("welcome");
//!     }
//! });
//!
//! // Transport side: serve one eventsource request.
//! let id = SessionId::new("a1b2c3")?;
//! let mut receiver = EventSourceReceiver::new(body, Some(128 * 1024));
//! let outcome = coordinator
//!     .serve(&id, &mut receiver, &CancellationToken::new())
//!     .await;
//! println!("request finished: {outcome:?}");
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Session id and attach token |
//! | [`options`] | [`SessionOptions`] |
//! | [`protocol`] | Frames, close values, escaping |
//! | [`session`] | [`Session`], [`Registry`], [`AttachCoordinator`] |
//! | [`transport`] | [`Receiver`] trait and reference receivers |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Session and transport configuration.
pub mod options;

/// Protocol frame codec.
pub mod protocol;

/// Sessions, registry and attach coordination.
pub mod session;

/// Receivers for each transport.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{AttachToken, SessionId};

// Configuration
pub use options::SessionOptions;

// Protocol types
pub use protocol::{CloseInfo, Frame};

// Session types
pub use session::{
    AttachCoordinator, AttachOutcome, Attachment, DetachReason, Registry, ServeOutcome, Session,
    SessionState,
};

// Transport types
pub use transport::{
    EventSourceReceiver, PollingReceiver, Receiver, ReceiverKind, WebSocketReceiver,
    XhrStreamingReceiver, serve_websocket,
};

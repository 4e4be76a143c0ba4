//! Error types for the session core.
//!
//! This module defines all error types used throughout the crate.
//!
//! Protocol outcomes such as an attach conflict or an attach against a
//! closed session are *not* errors: they are answered in-band with a close
//! frame (see [`AttachOutcome`](crate::session::AttachOutcome)). The variants
//! here cover configuration mistakes, malformed frames and I/O failures on a
//! client connection.
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidSessionId`] |
//! | Protocol | [`Error::InvalidFrame`] |
//! | Session | [`Error::SessionClosed`], [`Error::ReceiverClosed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::SessionId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when [`SessionOptions`](crate::SessionOptions) fail validation.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Session identifier rejected.
    #[error("Invalid session id: {message}")]
    InvalidSessionId {
        /// Why the identifier was rejected.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Frame text could not be decoded.
    #[error("Invalid frame: {message}")]
    InvalidFrame {
        /// Description of the malformed input.
        message: String,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Session no longer accepts messages.
    ///
    /// Returned when enqueueing on a session that is closing or closed.
    #[error("Session closed: {session_id}")]
    SessionClosed {
        /// The closed session.
        session_id: SessionId,
    },

    /// Receiver has stopped accepting writes.
    #[error("Receiver closed")]
    ReceiverClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid session id error.
    #[inline]
    pub fn invalid_session_id(message: impl Into<String>) -> Self {
        Self::InvalidSessionId {
            message: message.into(),
        }
    }

    /// Creates an invalid frame error.
    #[inline]
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame {
            message: message.into(),
        }
    }

    /// Creates a session closed error.
    #[inline]
    pub fn session_closed(session_id: SessionId) -> Self {
        Self::SessionClosed { session_id }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error means the client connection is unusable.
    ///
    /// The session treats these as an implicit disconnect.
    #[inline]
    #[must_use]
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, Self::Io(_) | Self::WebSocket(_) | Self::ReceiverClosed)
    }

    /// Returns `true` if the session refused the operation because it closed.
    #[inline]
    #[must_use]
    pub fn is_session_closed(&self) -> bool {
        matches!(self, Self::SessionClosed { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

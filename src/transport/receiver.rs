//! The capability every transport implements to serve a session.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::Frame;

// ============================================================================
// ReceiverKind
// ============================================================================

/// Transport family of a [`Receiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiverKind {
    /// `text/event-stream` response.
    EventSource,
    /// Chunked XHR streaming response.
    XhrStreaming,
    /// One-shot XHR poll.
    XhrPolling,
    /// Native full-duplex channel.
    WebSocket,
}

impl ReceiverKind {
    /// Returns the transport name as used in request paths.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EventSource => "eventsource",
            Self::XhrStreaming => "xhr_streaming",
            Self::XhrPolling => "xhr",
            Self::WebSocket => "websocket",
        }
    }

    /// Returns `true` for transports that keep one response open for many
    /// frames and are therefore subject to the response limit.
    #[inline]
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        matches!(self, Self::EventSource | Self::XhrStreaming)
    }

    /// Returns the `Content-Type` an HTTP host sets on the response, or
    /// `None` for WebSocket.
    #[must_use]
    pub const fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::EventSource => Some(super::eventsource::CONTENT_TYPE),
            Self::XhrStreaming => Some(super::streaming::CONTENT_TYPE),
            Self::XhrPolling => Some(super::polling::CONTENT_TYPE),
            Self::WebSocket => None,
        }
    }
}

impl fmt::Display for ReceiverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Receiver
// ============================================================================

/// One connection's ability to push frames to the client.
///
/// A receiver is driven by exactly one
/// [`Attachment`](crate::session::Attachment) at a time. Frames arrive in
/// session order; implementations must write and flush each one before
/// returning so the client observes it promptly.
#[async_trait]
pub trait Receiver: Send {
    /// Transport family, for diagnostics.
    fn kind(&self) -> ReceiverKind;

    /// Writes one frame to the connection.
    ///
    /// # Errors
    ///
    /// - [`Error::ReceiverClosed`](crate::Error::ReceiverClosed) after [`Receiver::close`]
    /// - [`Error::Io`](crate::Error::Io) or [`Error::WebSocket`](crate::Error::WebSocket)
    ///   when the connection is gone
    async fn send_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Stops accepting writes and releases the connection.
    ///
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the shutdown itself fails.
    async fn close(&mut self) -> Result<()>;

    /// Returns `true` while further frames may be written.
    fn can_send(&self) -> bool;
}

#[async_trait]
impl<R: Receiver + ?Sized> Receiver for Box<R> {
    fn kind(&self) -> ReceiverKind {
        (**self).kind()
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        (**self).send_frame(frame).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }

    fn can_send(&self) -> bool {
        (**self).can_send()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(ReceiverKind::EventSource.to_string(), "eventsource");
        assert_eq!(ReceiverKind::XhrStreaming.as_str(), "xhr_streaming");
        assert_eq!(ReceiverKind::XhrPolling.as_str(), "xhr");
        assert_eq!(ReceiverKind::WebSocket.as_str(), "websocket");
    }

    #[test]
    fn test_streaming_kinds() {
        assert!(ReceiverKind::EventSource.is_streaming());
        assert!(ReceiverKind::XhrStreaming.is_streaming());
        assert!(!ReceiverKind::XhrPolling.is_streaming());
        assert!(!ReceiverKind::WebSocket.is_streaming());
    }

    #[test]
    fn test_content_types() {
        assert_eq!(
            ReceiverKind::EventSource.content_type(),
            Some("text/event-stream; charset=UTF-8")
        );
        assert_eq!(
            ReceiverKind::XhrStreaming.content_type(),
            Some("application/javascript; charset=UTF-8")
        );
        assert_eq!(
            ReceiverKind::XhrPolling.content_type(),
            Some("application/javascript; charset=UTF-8")
        );
        assert_eq!(ReceiverKind::WebSocket.content_type(), None);
    }
}

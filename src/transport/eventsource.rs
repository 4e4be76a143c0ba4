//! Eventsource (`text/event-stream`) receiver.
//!
//! # Wire Format
//!
//! ```text
//! \r\n                      prologue, once
//! data: o\r\n\r\n           open
//! data: a["msg"]\r\n\r\n    messages
//! data: c[3000,"Go away!"]\r\n\r\n
//! ```
//!
//! Frame text is escaped with [`escape`] so that CR and LF inside payloads
//! cannot terminate an event early.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::options::SessionOptions;
use crate::protocol::{Frame, escape};

use super::receiver::{Receiver, ReceiverKind};
use super::stream::ResponseStream;

// ============================================================================
// Constants
// ============================================================================

/// `Content-Type` of an eventsource response.
pub const CONTENT_TYPE: &str = "text/event-stream; charset=UTF-8";

/// Written once at stream start.
pub const PROLOGUE: &[u8] = b"\r\n";

/// Prefix of each event line.
const DATA_PREFIX: &str = "data: ";

/// Terminates each event.
const EVENT_TERMINATOR: &str = "\r\n\r\n";

// ============================================================================
// Encoding
// ============================================================================

/// Encodes one frame as an eventsource event.
///
/// # Errors
///
/// Returns [`Error::Json`](crate::Error::Json) if the frame payload cannot be
/// serialized.
pub fn encode_event(frame: &Frame) -> Result<String> {
    let text = frame.encode()?;
    Ok(wrap_event(&text))
}

/// Wraps already-encoded frame text as an event, escaping it.
#[must_use]
pub fn wrap_event(text: &str) -> String {
    let escaped = escape(text);
    let mut event =
        String::with_capacity(DATA_PREFIX.len() + escaped.len() + EVENT_TERMINATOR.len());
    event.push_str(DATA_PREFIX);
    event.push_str(&escaped);
    event.push_str(EVENT_TERMINATOR);
    event
}

/// Writes already-encoded frame text as an event to `out`.
///
/// # Errors
///
/// Returns [`Error::Io`](crate::Error::Io) if the write fails.
pub async fn write_event<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> Result<usize> {
    let event = wrap_event(text);
    out.write_all(event.as_bytes()).await?;
    Ok(event.len())
}

// ============================================================================
// EventSourceReceiver
// ============================================================================

/// Streams frames as server-sent events.
///
/// Subject to the response limit: once the written bytes cross it the
/// receiver stops accepting frames and the client reconnects.
#[derive(Debug)]
pub struct EventSourceReceiver<W> {
    stream: ResponseStream<W>,
}

impl<W: AsyncWrite + Unpin + Send> EventSourceReceiver<W> {
    /// Creates a receiver writing to `writer`.
    ///
    /// # Arguments
    ///
    /// * `writer` - Response body
    /// * `response_limit` - Byte budget, `None` or `Some(0)` for unlimited
    #[must_use]
    pub fn new(writer: W, response_limit: Option<u64>) -> Self {
        Self {
            stream: ResponseStream::new(writer, Some(PROLOGUE.to_vec()), response_limit),
        }
    }

    /// Creates a receiver using the limit from `options`.
    #[must_use]
    pub fn with_options(writer: W, options: &SessionOptions) -> Self {
        Self::new(writer, options.response_limit())
    }

    /// Returns the number of event bytes written.
    #[inline]
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.stream.written()
    }

    /// Returns a reference to the underlying writer.
    #[inline]
    #[must_use]
    pub fn get_ref(&self) -> &W {
        self.stream.get_ref()
    }

    /// Consumes the receiver, returning the underlying writer.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> W {
        self.stream.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Receiver for EventSourceReceiver<W> {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::EventSource
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let event = encode_event(frame)?;
        self.stream.write_chunk(event.as_bytes()).await
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await
    }

    fn can_send(&self) -> bool {
        !self.stream.is_closed() && !self.stream.limit_reached()
    }
}

// ============================================================================
// Tests
// ============================================================================

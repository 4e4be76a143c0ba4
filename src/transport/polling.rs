//! XHR polling receiver.
//!
//! Each poll request carries exactly one frame back (`<text>\n`) and then
//! completes, so the client issues the next poll.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::error::{Error, Result};
use crate::protocol::Frame;

use super::receiver::{Receiver, ReceiverKind};
use super::stream::ResponseStream;

// ============================================================================
// Constants
// ============================================================================

/// `Content-Type` of a poll response.
pub const CONTENT_TYPE: &str = "application/javascript; charset=UTF-8";

// ============================================================================
// PollingReceiver
// ============================================================================

/// Answers one poll with one frame.
#[derive(Debug)]
pub struct PollingReceiver<W> {
    stream: ResponseStream<W>,
    delivered: bool,
}

impl<W: AsyncWrite + Unpin + Send> PollingReceiver<W> {
    /// Creates a receiver writing to `writer`.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            stream: ResponseStream::new(writer, None, None),
            delivered: false,
        }
    }

    /// Returns `true` once the poll has been answered.
    #[inline]
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        self.delivered
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
impl<W: AsyncWrite + Unpin + Send> Receiver for PollingReceiver<W> {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::XhrPolling
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.delivered {
            return Err(Error::ReceiverClosed);
        }

        let mut line = frame.encode()?;
        line.push('\n');
        self.stream.write_chunk(line.as_bytes()).await?;
        self.delivered = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await
    }

    fn can_send(&self) -> bool {
        !self.delivered && !self.stream.is_closed()
    }
}

// ============================================================================
// Tests
// ============================================================================

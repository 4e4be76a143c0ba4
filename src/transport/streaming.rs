//! XHR streaming receiver.
//!
//! A 2 KiB prelude of `h` bytes defeats browser buffering of the first
//! chunk; each frame follows as its text plus `\n`.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::error::Result;
use crate::options::SessionOptions;
use crate::protocol::Frame;

use super::receiver::{Receiver, ReceiverKind};
use super::stream::ResponseStream;

// ============================================================================
// Constants
// ============================================================================

/// `Content-Type` of an XHR streaming response.
pub const CONTENT_TYPE: &str = "application/javascript; charset=UTF-8";

/// Number of `h` bytes in the prelude.
const PRELUDE_LEN: usize = 2048;

fn prelude() -> Vec<u8> {
    let mut prelude = vec![b'h'; PRELUDE_LEN];
    prelude.push(b'\n');
    prelude
}

// ============================================================================
// XhrStreamingReceiver
// ============================================================================

/// Streams newline-delimited frames over one chunked response.
#[derive(Debug)]
pub struct XhrStreamingReceiver<W> {
    stream: ResponseStream<W>,
}

impl<W: AsyncWrite + Unpin + Send> XhrStreamingReceiver<W> {
    /// Creates a receiver writing to `writer` with the given byte budget.
    #[must_use]
    pub fn new(writer: W, response_limit: Option<u64>) -> Self {
        Self {
            stream: ResponseStream::new(writer, Some(prelude()), response_limit),
        }
    }

    /// Creates a receiver using the limit from `options`.
    #[must_use]
    pub fn with_options(writer: W, options: &SessionOptions) -> Self {
        Self::new(writer, options.response_limit())
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
impl<W: AsyncWrite + Unpin + Send> Receiver for XhrStreamingReceiver<W> {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::XhrStreaming
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let mut line = frame.encode()?;
        line.push('\n');
        self.stream.write_chunk(line.as_bytes()).await
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

//! Byte sink shared by the HTTP response receivers.

// ============================================================================
// Imports
// ============================================================================

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Error, Result};

// ============================================================================
// ResponseStream
// ============================================================================

/// HTTP response body with an optional prelude and byte budget.
///
/// The prelude is written lazily before the first chunk and does not count
/// toward the limit. Any write error marks the stream closed.
#[derive(Debug)]
pub(crate) struct ResponseStream<W> {
    writer: W,
    prelude: Option<Vec<u8>>,
    written: u64,
    limit: Option<u64>,
    closed: bool,
}

impl<W: AsyncWrite + Unpin + Send> ResponseStream<W> {
    pub(crate) fn new(writer: W, prelude: Option<Vec<u8>>, limit: Option<u64>) -> Self {
        Self {
            writer,
            prelude,
            written: 0,
            limit: limit.filter(|limit| *limit > 0),
            closed: false,
        }
    }

    /// Writes and flushes one chunk.
    pub(crate) async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ReceiverClosed);
        }

        let result = self.write_inner(chunk).await;
        if result.is_err() {
            self.closed = true;
        }
        result
    }

    async fn write_inner(&mut self, chunk: &[u8]) -> Result<()> {
        if let Some(prelude) = self.prelude.take() {
            self.writer.write_all(&prelude).await?;
        }

        self.writer.write_all(chunk).await?;
        self.writer.flush().await?;
        self.written += chunk.len() as u64;

        trace!(bytes = chunk.len(), total = self.written, "Chunk written");
        Ok(())
    }

    /// Shuts the writer down. Idempotent.
    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.shutdown().await?;
        Ok(())
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns `true` once the written bytes reached the limit.
    #[inline]
    pub(crate) fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.written >= limit)
    }

    #[inline]
    pub(crate) fn written(&self) -> u64 {
        self.written
    }

    #[inline]
    pub(crate) fn get_ref(&self) -> &W {
        &self.writer
    }

    #[inline]
    pub(crate) fn into_inner(self) -> W {
        self.writer
    }
}

// ============================================================================
// Tests
// ============================================================================

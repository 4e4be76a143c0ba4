//! Driving an attached receiver.
//!
//! An [`Attachment`] is the right to use a session's receiver slot. Its
//! [`run`](Attachment::run) loop pumps queued frames into the receiver,
//! writes heartbeats while idle and detaches when the receiver is done, the
//! session closes or the request is cancelled.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::identifiers::AttachToken;
use crate::protocol::Frame;
use crate::transport::Receiver;

use super::core::{NextFrame, Session};

// ============================================================================
// DetachReason
// ============================================================================

/// Why an attachment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetachReason {
    /// The receiver cannot take more frames (response limit, single poll).
    Completed,
    /// The close frame was delivered.
    Closed,
    /// The request was cancelled by the client or the server.
    Interrupted,
    /// Writing a frame failed; the frame stays queued.
    DeliveryFailed,
    /// The attachment was dropped without running to completion.
    Abandoned,
    /// The slot was cleared by someone else.
    Superseded,
}

impl DetachReason {
    /// Returns the lowercase reason name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Closed => "closed",
            Self::Interrupted => "interrupted",
            Self::DeliveryFailed => "delivery_failed",
            Self::Abandoned => "abandoned",
            Self::Superseded => "superseded",
        }
    }
}

impl fmt::Display for DetachReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Attachment
// ============================================================================

/// An installed receiver slot.
///
/// Dropping an attachment that has not finished [`run`](Self::run) detaches
/// it with [`DetachReason::Abandoned`].
pub struct Attachment {
    session: Arc<Session>,
    token: AttachToken,
    finished: bool,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("session_id", self.session.id())
            .field("token", &self.token)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Attachment {
    pub(crate) fn new(session: Arc<Session>, token: AttachToken) -> Self {
        Self {
            session,
            token,
            finished: false,
        }
    }

    /// Returns the session this attachment belongs to.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Returns the token identifying this attachment.
    #[inline]
    #[must_use]
    pub fn token(&self) -> AttachToken {
        self.token
    }

    /// Delivers frames into `receiver` until the attachment ends.
    ///
    /// On return the slot has been cleared and `receiver` closed.
    pub async fn run<R>(mut self, receiver: &mut R, cancel: &CancellationToken) -> DetachReason
    where
        R: Receiver + ?Sized,
    {
        let reason = self.drive(receiver, cancel).await;

        self.finished = true;
        self.session.detach_receiver(self.token, reason);

        if let Err(e) = receiver.close().await {
            debug!(
                session_id = %self.session.id(),
                kind = %receiver.kind(),
                error = %e,
                "Receiver close failed"
            );
        }
        reason
    }

    async fn drive<R>(&self, receiver: &mut R, cancel: &CancellationToken) -> DetachReason
    where
        R: Receiver + ?Sized,
    {
        let heartbeat_delay = self.session.options().heartbeat_delay;

        loop {
            if cancel.is_cancelled() {
                return DetachReason::Interrupted;
            }
            if !receiver.can_send() {
                return DetachReason::Completed;
            }

            // Registered before peeking so a frame queued in between still
            // wakes this loop.
            let notified = self.session.wake().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.session.next_frame(self.token) {
                NextFrame::Detached => return DetachReason::Superseded,
                NextFrame::Ready { frame, count } => {
                    if let Err(e) = receiver.send_frame(&frame).await {
                        if e.is_delivery_failure() {
                            debug!(
                                session_id = %self.session.id(),
                                kind = %receiver.kind(),
                                frame = %frame.tag(),
                                error = %e,
                                "Receiver gone, frame stays queued"
                            );
                        } else {
                            warn!(
                                session_id = %self.session.id(),
                                kind = %receiver.kind(),
                                frame = %frame.tag(),
                                error = %e,
                                "Frame delivery failed"
                            );
                        }
                        return DetachReason::DeliveryFailed;
                    }

                    self.session.acknowledge(self.token, &frame, count);
                    trace!(
                        session_id = %self.session.id(),
                        frame = %frame.tag(),
                        count,
                        "Frame delivered"
                    );

                    if frame.is_close() {
                        return DetachReason::Closed;
                    }
                    continue;
                }
                NextFrame::Idle => {}
            }

            tokio::select! {
                biased;

                () = cancel.cancelled() => return DetachReason::Interrupted,

                () = &mut notified => {}

                () = sleep(heartbeat_delay) => {
                    if let Err(e) = receiver.send_frame(&Frame::Heartbeat).await {
                        warn!(
                            session_id = %self.session.id(),
                            kind = %receiver.kind(),
                            error = %e,
                            "Heartbeat delivery failed"
                        );
                        return DetachReason::DeliveryFailed;
                    }
                    trace!(session_id = %self.session.id(), "Heartbeat sent");
                }
            }
        }
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        if !self.finished {
            self.session
                .detach_receiver(self.token, DetachReason::Abandoned);
        }
    }
}

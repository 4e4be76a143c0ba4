//! The session: protocol state, outbound queue and the receiver slot.
//!
//! # Locking
//!
//! One [`RwLock`] guards state, queue, slot and close metadata. It is never
//! held across an `.await`: the attachment driver copies the next frame out
//! under the lock, writes it with the lock released, then acknowledges it
//! under the lock again. Only the attached driver pops the queue, and only
//! after a successful write, so frames are delivered in FIFO order at least
//! once per receiver.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::from_str;
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc, watch};
use tracing::{debug, info, trace};

use crate::error::{Error, Result};
use crate::identifiers::{AttachToken, SessionId};
use crate::options::SessionOptions;
use crate::protocol::{CloseInfo, Frame, coalesce_head};
use crate::transport::ReceiverKind;

use super::attachment::{Attachment, DetachReason};
use super::state::SessionState;

// ============================================================================
// AttachOutcome
// ============================================================================

/// Result of [`Session::attach_receiver`].
#[derive(Debug)]
pub enum AttachOutcome {
    /// Receiver installed; drive it with [`Attachment::run`].
    Accepted(Attachment),
    /// Receiver turned away; answer it with this close frame and stop.
    Rejected(Frame),
}

impl AttachOutcome {
    /// Returns `true` if the receiver was installed.
    #[inline]
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// Returns the close frame for a rejected receiver.
    #[inline]
    #[must_use]
    pub fn rejection_frame(&self) -> Option<&Frame> {
        match self {
            Self::Accepted(_) => None,
            Self::Rejected(frame) => Some(frame),
        }
    }
}

/// Next unit of work for an attachment driver.
#[derive(Debug)]
pub(crate) enum NextFrame {
    /// Deliver `frame`, covering `count` queued frames.
    Ready { frame: Frame, count: usize },
    /// Nothing queued.
    Idle,
    /// The slot no longer holds this attachment.
    Detached,
}

// ============================================================================
// Session
// ============================================================================

/// Receiver currently installed in the slot.
#[derive(Debug)]
struct AttachedReceiver {
    token: AttachToken,
    kind: ReceiverKind,
}

/// Fields guarded by the session lock.
#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    queue: VecDeque<Frame>,
    receiver: Option<AttachedReceiver>,
    close_info: Option<CloseInfo>,
    open_queued: bool,
    /// Bumped on every attach and detach; disconnect timers compare it.
    generation: u64,
}

/// A logical connection serviced by a sequence of receivers.
///
/// Create sessions through a [`Registry`](crate::Registry); the constructor
/// is public for transports that manage their own lookup.
pub struct Session {
    id: SessionId,
    options: Arc<SessionOptions>,
    inner: RwLock<SessionInner>,
    wake: Notify,
    state_tx: watch::Sender<SessionState>,
    inbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: AsyncMutex<mpsc::UnboundedReceiver<String>>,
    weak_self: Weak<Session>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("queued", &inner.queue.len())
            .field("receiver", &inner.receiver.as_ref().map(|r| r.kind))
            .finish()
    }
}

// ============================================================================
// Session - Constructor
// ============================================================================

impl Session {
    /// Creates a session in the [`SessionState::Opening`] state.
    ///
    /// When called inside a Tokio runtime the disconnect timer starts right
    /// away: a session nobody attaches to closes after
    /// [`SessionOptions::disconnect_delay`].
    #[must_use]
    pub fn new(id: SessionId, options: Arc<SessionOptions>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::Opening);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let session = Arc::new_cyclic(|weak_self| Self {
            id,
            options,
            inner: RwLock::new(SessionInner {
                state: SessionState::Opening,
                queue: VecDeque::new(),
                receiver: None,
                close_info: None,
                open_queued: false,
                generation: 0,
            }),
            wake: Notify::new(),
            state_tx,
            inbound_tx,
            inbound_rx: AsyncMutex::new(inbound_rx),
            weak_self: weak_self.clone(),
        });

        debug!(session_id = %session.id, "Session created");
        session.schedule_expiry(0);
        session
    }
}

// ============================================================================
// Session - Accessors
// ============================================================================

impl Session {
    /// Returns the session id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the options this session runs with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    /// Returns `true` once the session reached [`SessionState::Closed`].
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Subscribes to state changes.
    ///
    /// Intermediate states may be coalesced, but the observed sequence is
    /// always increasing.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Returns the kind of the attached receiver, if any.
    #[must_use]
    pub fn receiver_kind(&self) -> Option<ReceiverKind> {
        self.inner.read().receiver.as_ref().map(|r| r.kind)
    }

    /// Returns `true` while a receiver is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.read().receiver.is_some()
    }

    /// Returns the close metadata once set.
    #[must_use]
    pub fn close_info(&self) -> Option<CloseInfo> {
        self.inner.read().close_info.clone()
    }

    /// Returns the number of frames waiting for delivery.
    #[must_use]
    pub fn queued_frames(&self) -> usize {
        self.inner.read().queue.len()
    }

    pub(crate) fn wake(&self) -> &Notify {
        &self.wake
    }
}

// ============================================================================
// Session - Outbound
// ============================================================================

impl Session {
    /// Queues the `open` frame ahead of everything else. Idempotent.
    pub fn open(&self) {
        let mut inner = self.inner.write();
        Self::queue_open(&mut inner);
        drop(inner);
        self.wake.notify_one();
    }

    /// Queues one application message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] unless the session is opening or
    /// active.
    pub fn enqueue_message(&self, message: impl Into<String>) -> Result<()> {
        self.enqueue_messages([message.into()])
    }

    /// Queues several application messages as one batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] unless the session is opening or
    /// active.
    pub fn enqueue_messages<I, S>(&self, messages: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let batch: Vec<String> = messages.into_iter().map(Into::into).collect();

        let mut inner = self.inner.write();
        if !inner.state.is_open() {
            return Err(Error::session_closed(self.id.clone()));
        }
        if batch.is_empty() {
            return Ok(());
        }

        trace!(session_id = %self.id, count = batch.len(), "Messages enqueued");
        inner.queue.push_back(Frame::Messages(batch));
        drop(inner);

        self.wake.notify_one();
        Ok(())
    }

    /// Closes the session with `code` and `reason`.
    ///
    /// The first call wins; later calls return `false` and leave the stored
    /// close metadata untouched. With a receiver attached the session moves
    /// to [`SessionState::Closing`] until the close frame has been written,
    /// otherwise straight to [`SessionState::Closed`].
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        let info = CloseInfo::new(code, reason);

        let mut inner = self.inner.write();
        if !inner.state.is_open() {
            debug!(session_id = %self.id, state = %inner.state, "Close ignored");
            return false;
        }
        self.close_locked(&mut inner, info);
        drop(inner);

        self.wake.notify_one();
        true
    }

    /// Waits until the session is closed.
    ///
    /// Returns immediately if it already is.
    pub async fn closed(&self) {
        let mut state_rx = self.state_tx.subscribe();
        let _ = state_rx
            .wait_for(|state| *state == SessionState::Closed)
            .await;
    }
}

// ============================================================================
// Session - Attach / Detach
// ============================================================================

impl Session {
    /// Tries to install a receiver of `kind`.
    ///
    /// - Closing or closed session: rejected with the stored close metadata,
    ///   or `3000 "Go away!"` if none was recorded.
    /// - Receiver already attached: rejected with
    ///   `2010 "Another connection still open"`; the existing attachment is
    ///   not disturbed.
    /// - Otherwise installed; the `open` frame is queued first if the
    ///   session is still opening.
    ///
    /// # Panics
    ///
    /// Panics if the slot is found occupied after the check, which would
    /// mean two receivers attached at once.
    pub fn attach_receiver(self: &Arc<Self>, kind: ReceiverKind) -> AttachOutcome {
        let mut inner = self.inner.write();

        if !inner.state.is_open() {
            let info = inner.close_info.clone().unwrap_or_else(CloseInfo::go_away);
            debug!(session_id = %self.id, %kind, close = %info, "Attach rejected, session closed");
            return AttachOutcome::Rejected(Frame::Close(info));
        }

        if let Some(attached) = &inner.receiver {
            debug!(
                session_id = %self.id,
                %kind,
                attached = %attached.kind,
                "Attach rejected, another receiver attached"
            );
            return AttachOutcome::Rejected(Frame::Close(CloseInfo::another_connection()));
        }

        let token = AttachToken::next();
        let previous = inner.receiver.replace(AttachedReceiver { token, kind });
        assert!(
            previous.is_none(),
            "session {} has two receivers attached",
            self.id
        );
        inner.generation += 1;
        Self::queue_open(&mut inner);
        drop(inner);

        self.wake.notify_one();
        info!(session_id = %self.id, %kind, %token, "Receiver attached");

        AttachOutcome::Accepted(Attachment::new(Arc::clone(self), token))
    }

    /// Clears the slot if it still holds `token`.
    ///
    /// Returns `false` for a stale or repeated detach, which is a no-op.
    /// Detaching never changes the state by itself, except that a closing
    /// session completes its close and an interrupted receiver closes the
    /// session when [`SessionOptions::close_on_interrupt`] is set. Otherwise
    /// the session keeps buffering and the disconnect timer starts.
    pub fn detach_receiver(&self, token: AttachToken, reason: DetachReason) -> bool {
        let mut inner = self.inner.write();

        let Some(attached) = inner.receiver.take_if(|attached| attached.token == token) else {
            trace!(session_id = %self.id, %token, "Stale detach ignored");
            return false;
        };
        inner.generation += 1;
        let generation = inner.generation;

        info!(
            session_id = %self.id,
            kind = %attached.kind,
            %token,
            %reason,
            "Receiver detached"
        );

        let mut start_timer = false;
        let state = inner.state;
        match state {
            SessionState::Closing => self.finish_close(&mut inner),
            state if state.is_open() => {
                if reason == DetachReason::Interrupted && self.options.close_on_interrupt {
                    self.close_locked(&mut inner, CloseInfo::interrupted());
                } else {
                    start_timer = true;
                }
            }
            _ => {}
        }
        drop(inner);

        if start_timer {
            self.schedule_expiry(generation);
        }
        true
    }

    /// Returns the next frame for the attachment holding `token`.
    pub(crate) fn next_frame(&self, token: AttachToken) -> NextFrame {
        let inner = self.inner.read();

        if !inner
            .receiver
            .as_ref()
            .is_some_and(|attached| attached.token == token)
        {
            return NextFrame::Detached;
        }

        match coalesce_head(&inner.queue) {
            Some((frame, count)) => NextFrame::Ready { frame, count },
            None => NextFrame::Idle,
        }
    }

    /// Pops `count` delivered frames; `frame` is what was written.
    pub(crate) fn acknowledge(&self, token: AttachToken, frame: &Frame, count: usize) {
        let mut inner = self.inner.write();

        if !inner
            .receiver
            .as_ref()
            .is_some_and(|attached| attached.token == token)
        {
            return;
        }

        let count = count.min(inner.queue.len());
        inner.queue.drain(..count);

        if *frame == Frame::Open && inner.state == SessionState::Opening {
            self.set_state(&mut inner, SessionState::Active);
        }
    }
}

// ============================================================================
// Session - Inbound
// ============================================================================

impl Session {
    /// Hands client messages to the application.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] unless the session is opening or
    /// active.
    pub fn push_inbound<I, S>(&self, messages: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.state().is_open() {
            return Err(Error::session_closed(self.id.clone()));
        }

        for message in messages {
            // The receiving half lives in `self`, so the send cannot fail.
            let _ = self.inbound_tx.send(message.into());
        }
        Ok(())
    }

    /// Decodes a client payload and hands its messages to the application.
    ///
    /// Accepts a JSON array of strings or a single JSON string.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidFrame`] for an empty payload
    /// - [`Error::Json`] for malformed JSON
    /// - [`Error::SessionClosed`] unless the session is opening or active
    pub fn push_inbound_json(&self, payload: &str) -> Result<()> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(Error::invalid_frame("payload expected"));
        }

        let messages: Vec<String> = if payload.starts_with('[') {
            from_str(payload)?
        } else {
            vec![from_str(payload)?]
        };
        self.push_inbound(messages)
    }

    /// Receives the next client message.
    ///
    /// Returns `None` once the session is closed and every message pushed
    /// before the close has been received.
    pub async fn recv(&self) -> Option<String> {
        let mut inbound_rx = self.inbound_rx.lock().await;

        if let Ok(message) = inbound_rx.try_recv() {
            return Some(message);
        }

        tokio::select! {
            biased;
            message = inbound_rx.recv() => message,
            () = self.closed() => inbound_rx.try_recv().ok(),
        }
    }
}

// ============================================================================
// Session - Internals
// ============================================================================

impl Session {
    fn queue_open(inner: &mut SessionInner) {
        if inner.state == SessionState::Opening && !inner.open_queued {
            inner.queue.push_front(Frame::Open);
            inner.open_queued = true;
        }
    }

    fn set_state(&self, inner: &mut SessionInner, next: SessionState) {
        assert!(
            inner.state.can_advance_to(next),
            "session {} cannot move from {} to {}",
            self.id,
            inner.state,
            next
        );
        debug!(session_id = %self.id, from = %inner.state, to = %next, "Session state changed");
        inner.state = next;
        self.state_tx.send_replace(next);
    }

    fn close_locked(&self, inner: &mut SessionInner, info: CloseInfo) {
        inner.close_info = Some(info.clone());
        self.set_state(inner, SessionState::Closing);

        if inner.receiver.is_some() {
            inner.queue.push_back(Frame::Close(info));
        } else {
            self.finish_close(inner);
        }
    }

    fn finish_close(&self, inner: &mut SessionInner) {
        if !inner.queue.is_empty() {
            debug!(
                session_id = %self.id,
                dropped = inner.queue.len(),
                "Discarding undelivered frames"
            );
            inner.queue.clear();
        }
        self.set_state(inner, SessionState::Closed);
        info!(
            session_id = %self.id,
            close = ?inner.close_info,
            "Session closed"
        );
    }

    /// Closes the session after the disconnect delay unless a receiver
    /// attaches (or detaches) in the meantime.
    fn schedule_expiry(&self, generation: u64) {
        let Ok(handle) = Handle::try_current() else {
            trace!(session_id = %self.id, "No runtime, disconnect timer not started");
            return;
        };

        let session = self.weak_self.clone();
        let delay = self.options.disconnect_delay;
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(session) = session.upgrade() {
                session.expire(generation);
            }
        });
    }

    fn expire(&self, generation: u64) {
        let mut inner = self.inner.write();
        if !inner.state.is_open() || inner.receiver.is_some() || inner.generation != generation {
            return;
        }

        info!(session_id = %self.id, "Session timed out without a receiver");
        self.close_locked(&mut inner, CloseInfo::go_away());
    }
}

// ============================================================================
// Tests
// ============================================================================

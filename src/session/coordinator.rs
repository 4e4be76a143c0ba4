//! Resolving a connection to its session and serving it.
//!
//! # Attach Flow
//!
//! 1. Find or create the session in the [`Registry`].
//! 2. Closing or closed session: answer with its close frame.
//! 3. Receiver already attached: answer with
//!    `c[2010,"Another connection still open"]`, leave the existing one alone.
//! 4. Otherwise install the receiver and drive it until it detaches.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::identifiers::SessionId;
use crate::protocol::Frame;
use crate::transport::{Receiver, ReceiverKind};

use super::attachment::DetachReason;
use super::core::{AttachOutcome, Session};
use super::registry::Registry;

// ============================================================================
// ServeOutcome
// ============================================================================

/// How a served connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The receiver was attached and has since been detached.
    Detached(DetachReason),
    /// The receiver was answered with this close frame and closed.
    Rejected(Frame),
}

// ============================================================================
// AttachCoordinator
// ============================================================================

/// Attaches incoming receivers to registry sessions.
///
/// Cheap to clone; every clone shares the same [`Registry`].
#[derive(Debug, Clone)]
pub struct AttachCoordinator {
    registry: Arc<Registry>,
}

impl AttachCoordinator {
    /// Creates a coordinator over `registry`.
    #[inline]
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Returns the underlying registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Finds or creates session `id` and tries to attach a receiver of
    /// `kind` to it.
    pub fn attach(&self, id: &SessionId, kind: ReceiverKind) -> (Arc<Session>, AttachOutcome) {
        let (session, _) = self.registry.get_or_create(id);
        let outcome = session.attach_receiver(kind);
        (session, outcome)
    }

    /// Serves one connection for session `id`.
    ///
    /// Returns once the receiver is detached or has been rejected; in both
    /// cases `receiver` is closed. Cancelling `cancel` interrupts an
    /// attached receiver.
    pub async fn serve<R>(
        &self,
        id: &SessionId,
        receiver: &mut R,
        cancel: &CancellationToken,
    ) -> ServeOutcome
    where
        R: Receiver + ?Sized,
    {
        let (_session, outcome) = self.attach(id, receiver.kind());

        match outcome {
            AttachOutcome::Accepted(attachment) => {
                ServeOutcome::Detached(attachment.run(receiver, cancel).await)
            }
            AttachOutcome::Rejected(frame) => {
                reject(receiver, &frame).await;
                ServeOutcome::Rejected(frame)
            }
        }
    }
}

/// Writes the single rejection frame and closes `receiver`.
pub(crate) async fn reject<R>(receiver: &mut R, frame: &Frame)
where
    R: Receiver + ?Sized,
{
    if let Err(e) = receiver.send_frame(frame).await {
        debug!(kind = %receiver.kind(), error = %e, "Rejection frame not delivered");
    }
    if let Err(e) = receiver.close().await {
        debug!(kind = %receiver.kind(), error = %e, "Receiver close failed");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use proptest::prelude::*;
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    use crate::error::Error;
    use crate::options::SessionOptions;
    use crate::protocol::{CloseInfo, unescape};
    use crate::session::SessionState;
    use crate::transport::{EventSourceReceiver, PollingReceiver};

    const WAIT: Duration = Duration::from_secs(1);

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn coordinator_with(options: SessionOptions) -> AttachCoordinator {
        init_tracing();
        AttachCoordinator::new(Registry::new(options).unwrap())
    }

    fn coordinator() -> AttachCoordinator {
        coordinator_with(SessionOptions::new())
    }

    fn id(value: &str) -> SessionId {
        SessionId::new(value).unwrap()
    }

    /// Serves an eventsource receiver over an in-memory body.
    fn spawn_eventsource(
        coordinator: &AttachCoordinator,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> JoinHandle<(ServeOutcome, Vec<u8>)> {
        let coordinator = coordinator.clone();
        let session_id = session_id.clone();
        let cancel = cancel.clone();
        let limit = coordinator.registry().options().response_limit();

        tokio::spawn(async move {
            let mut receiver = EventSourceReceiver::new(Vec::new(), limit);
            let outcome = coordinator.serve(&session_id, &mut receiver, &cancel).await;
            (outcome, receiver.into_inner())
        })
    }

    async fn wait_for_state(session: &Session, state: SessionState) {
        let mut state_rx = session.subscribe_state();
        timeout(WAIT, state_rx.wait_for(|current| *current >= state))
            .await
            .expect("state not reached")
            .expect("state channel closed");
    }

    async fn read_until(reader: &mut DuplexStream, needle: &str) -> String {
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        timeout(WAIT, async {
            while !String::from_utf8_lossy(&received).contains(needle) {
                let n = reader.read(&mut buf).await.unwrap();
                assert!(n > 0, "stream ended before {needle:?}");
                received.extend_from_slice(&buf[..n]);
            }
        })
        .await
        .expect("needle not received");
        String::from_utf8(received).unwrap()
    }

    fn parse_eventsource(body: &[u8]) -> Vec<Frame> {
        let text = std::str::from_utf8(body).unwrap();
        let text = text.strip_prefix("\r\n").unwrap_or(text);
        text.split_terminator("\r\n\r\n")
            .map(|event| {
                let data = event.strip_prefix("data: ").unwrap();
                Frame::decode(&unescape(data).unwrap()).unwrap()
            })
            .collect()
    }

    struct FailingReceiver;

    #[async_trait]
    impl Receiver for FailingReceiver {
        fn kind(&self) -> ReceiverKind {
            ReceiverKind::XhrStreaming
        }

        async fn send_frame(&mut self, _frame: &Frame) -> crate::Result<()> {
            Err(Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone")))
        }

        async fn close(&mut self) -> crate::Result<()> {
            Ok(())
        }

        fn can_send(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_interrupt_after_open_writes_only_open_frame() {
        let coordinator = coordinator();
        let session_id = id("interrupt");
        let cancel = CancellationToken::new();

        let task = spawn_eventsource(&coordinator, &session_id, &cancel);
        let session = coordinator.registry().get_or_create(&session_id).0;
        wait_for_state(&session, SessionState::Active).await;

        cancel.cancel();
        let (outcome, body) = task.await.unwrap();

        assert_eq!(outcome, ServeOutcome::Detached(DetachReason::Interrupted));
        assert_eq!(body, b"\r\ndata: o\r\n\r\n");
        assert_eq!(session.close_info(), Some(CloseInfo::interrupted()));
    }

    #[tokio::test]
    async fn test_second_receiver_gets_2010_and_first_survives() {
        let coordinator = coordinator();
        let session_id = id("conflict");
        let cancel = CancellationToken::new();

        let first = spawn_eventsource(&coordinator, &session_id, &cancel);
        let session = coordinator.registry().get_or_create(&session_id).0;
        wait_for_state(&session, SessionState::Active).await;

        let (outcome, body) = spawn_eventsource(&coordinator, &session_id, &cancel)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ServeOutcome::Rejected(Frame::Close(CloseInfo::another_connection()))
        );
        assert_eq!(
            body,
            b"\r\ndata: c[2010,\"Another connection still open\"]\r\n\r\n"
        );
        assert_eq!(session.receiver_kind(), Some(ReceiverKind::EventSource));

        assert!(session.close(3000, "Go away!"));
        let (outcome, body) = timeout(WAIT, first).await.unwrap().unwrap();
        assert_eq!(outcome, ServeOutcome::Detached(DetachReason::Closed));
        assert_eq!(
            body,
            b"\r\ndata: o\r\n\r\ndata: c[3000,\"Go away!\"]\r\n\r\n"
        );
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_before_attach_closes_session() {
        let coordinator = coordinator();
        let session_id = id("precancelled");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (outcome, body) = spawn_eventsource(&coordinator, &session_id, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, ServeOutcome::Detached(DetachReason::Interrupted));
        assert!(body.is_empty());

        let session = coordinator.registry().get(&session_id).unwrap();
        timeout(WAIT, session.closed()).await.expect("closed signal");
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_attach_to_closed_session_gets_stored_close_frame() {
        let coordinator = coordinator();
        let session_id = id("closed");
        let (session, _) = coordinator.registry().get_or_create(&session_id);
        session.close(4001, "bye");

        let (outcome, body) = spawn_eventsource(&coordinator, &session_id, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ServeOutcome::Rejected(Frame::close(4001, "bye")));
        assert_eq!(body, b"\r\ndata: c[4001,\"bye\"]\r\n\r\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_attaches_have_one_winner() {
        const ATTEMPTS: usize = 16;

        let coordinator = coordinator();
        let session_id = id("race");
        let cancel = CancellationToken::new();
        let rejected = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..ATTEMPTS)
            .map(|_| {
                let task = spawn_eventsource(&coordinator, &session_id, &cancel);
                let rejected = Arc::clone(&rejected);
                tokio::spawn(async move {
                    let (outcome, _) = task.await.unwrap();
                    if matches!(outcome, ServeOutcome::Rejected(_)) {
                        rejected.fetch_add(1, Ordering::SeqCst);
                    }
                    outcome
                })
            })
            .collect();

        timeout(WAIT, async {
            while rejected.load(Ordering::SeqCst) < ATTEMPTS - 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("losers not rejected");

        coordinator
            .registry()
            .get(&session_id)
            .unwrap()
            .close(3000, "Go away!");

        let mut winners = 0;
        for task in tasks {
            match timeout(WAIT, task).await.unwrap().unwrap() {
                ServeOutcome::Detached(reason) => {
                    assert_eq!(reason, DetachReason::Closed);
                    winners += 1;
                }
                ServeOutcome::Rejected(frame) => {
                    assert_eq!(frame, Frame::Close(CloseInfo::another_connection()));
                }
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_state_sequence_is_increasing() {
        let coordinator = coordinator();
        let session_id = id("states");
        let (session, _) = coordinator.registry().get_or_create(&session_id);
        let mut state_rx = session.subscribe_state();
        let initial = *state_rx.borrow_and_update();

        let observer = tokio::spawn(async move {
            let mut seen = vec![initial];
            while state_rx.changed().await.is_ok() {
                let state = *state_rx.borrow_and_update();
                seen.push(state);
                if state == SessionState::Closed {
                    break;
                }
            }
            seen
        });

        let cancel = CancellationToken::new();
        let task = spawn_eventsource(&coordinator, &session_id, &cancel);
        wait_for_state(&session, SessionState::Active).await;
        session.close(3000, "Go away!");
        task.await.unwrap();

        let seen = timeout(WAIT, observer).await.unwrap().unwrap();
        assert_eq!(seen.first(), Some(&SessionState::Opening));
        assert_eq!(seen.last(), Some(&SessionState::Closed));
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn test_enqueue_wakes_idle_receiver() {
        let coordinator = coordinator();
        let session_id = id("wake");
        let cancel = CancellationToken::new();
        let (writer, mut reader) = duplex(4096);

        let task = {
            let coordinator = coordinator.clone();
            let session_id = session_id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut receiver = EventSourceReceiver::new(writer, None);
                coordinator.serve(&session_id, &mut receiver, &cancel).await
            })
        };

        read_until(&mut reader, "data: o\r\n\r\n").await;

        let session = coordinator.registry().get(&session_id).unwrap();
        session.enqueue_message("hi").unwrap();
        session.enqueue_message("there").unwrap();
        let received = read_until(&mut reader, "\"there\"").await;
        assert!(received.starts_with("data: a[\"hi\""));

        cancel.cancel();
        assert_eq!(
            task.await.unwrap(),
            ServeOutcome::Detached(DetachReason::Interrupted)
        );
    }

    #[tokio::test]
    async fn test_heartbeat_while_idle() {
        let coordinator =
            coordinator_with(SessionOptions::new().with_heartbeat_delay(Duration::from_millis(20)));
        let session_id = id("heartbeat");
        let cancel = CancellationToken::new();
        let (writer, mut reader) = duplex(4096);

        let task = {
            let coordinator = coordinator.clone();
            let session_id = session_id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut receiver = EventSourceReceiver::new(writer, None);
                coordinator.serve(&session_id, &mut receiver, &cancel).await
            })
        };

        let received = read_until(&mut reader, "data: h\r\n\r\n").await;
        assert!(received.starts_with("\r\ndata: o\r\n\r\n"));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_response_limit_detaches_and_keeps_queue() {
        let coordinator = coordinator_with(SessionOptions::new().with_response_limit(1));
        let session_id = id("limit");
        let cancel = CancellationToken::new();

        let (outcome, body) = spawn_eventsource(&coordinator, &session_id, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, ServeOutcome::Detached(DetachReason::Completed));
        assert_eq!(body, b"\r\ndata: o\r\n\r\n");

        let session = coordinator.registry().get(&session_id).unwrap();
        assert_eq!(session.state(), SessionState::Active);
        session.enqueue_message("after reconnect").unwrap();

        let (outcome, body) = spawn_eventsource(&coordinator, &session_id, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, ServeOutcome::Detached(DetachReason::Completed));
        assert_eq!(body, b"\r\ndata: a[\"after reconnect\"]\r\n\r\n");
    }

    #[tokio::test]
    async fn test_polling_delivers_one_frame_per_request() {
        let coordinator = coordinator();
        let session_id = id("poll");
        let cancel = CancellationToken::new();

        let mut first = PollingReceiver::new(Vec::new());
        let outcome = coordinator.serve(&session_id, &mut first, &cancel).await;
        assert_eq!(outcome, ServeOutcome::Detached(DetachReason::Completed));
        assert_eq!(first.into_inner(), b"o\n");

        let session = coordinator.registry().get(&session_id).unwrap();
        session.enqueue_messages(["x", "y"]).unwrap();
        session.enqueue_message("z").unwrap();

        let mut second = PollingReceiver::new(Vec::new());
        coordinator.serve(&session_id, &mut second, &cancel).await;
        assert_eq!(second.into_inner(), b"a[\"x\",\"y\",\"z\"]\n");
        assert_eq!(session.queued_frames(), 0);
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_session_open() {
        let coordinator = coordinator();
        let session_id = id("broken");
        let cancel = CancellationToken::new();

        let outcome = coordinator
            .serve(&session_id, &mut FailingReceiver, &cancel)
            .await;
        assert_eq!(outcome, ServeOutcome::Detached(DetachReason::DeliveryFailed));

        let session = coordinator.registry().get(&session_id).unwrap();
        assert_eq!(session.state(), SessionState::Opening);
        assert!(!session.is_attached());
        assert_eq!(session.queued_frames(), 1);

        let mut retry = PollingReceiver::new(Vec::new());
        coordinator.serve(&session_id, &mut retry, &cancel).await;
        assert_eq!(retry.into_inner(), b"o\n");
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_dropped_serve_future_detaches() {
        let coordinator = coordinator_with(SessionOptions::new().with_close_on_interrupt(true));
        let session_id = id("dropped");
        let cancel = CancellationToken::new();

        let task = spawn_eventsource(&coordinator, &session_id, &cancel);
        let session = coordinator.registry().get_or_create(&session_id).0;
        wait_for_state(&session, SessionState::Active).await;

        task.abort();
        let _ = task.await;

        assert!(!session.is_attached());
        assert_eq!(session.state(), SessionState::Active);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_messages_delivered_in_fifo_order(
            before in proptest::collection::vec(any::<String>(), 0..8),
            after in proptest::collection::vec(any::<String>(), 0..8),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let frames = runtime.block_on(async {
                let coordinator = coordinator();
                let session_id = id("fifo");
                let (session, _) = coordinator.registry().get_or_create(&session_id);

                for message in &before {
                    session.enqueue_message(message.clone()).unwrap();
                }
                let task = spawn_eventsource(&coordinator, &session_id, &CancellationToken::new());
                wait_for_state(&session, SessionState::Active).await;
                assert!(session.is_attached());
                for message in &after {
                    session.enqueue_message(message.clone()).unwrap();
                }
                session.close(3000, "Go away!");

                let (_, body) = task.await.unwrap();
                parse_eventsource(&body)
            });

            let expected: Vec<String> = before.iter().chain(&after).cloned().collect();
            let delivered: Vec<String> = frames
                .iter()
                .filter_map(|frame| match frame {
                    Frame::Messages(messages) => Some(messages.clone()),
                    _ => None,
                })
                .flatten()
                .collect();

            prop_assert_eq!(frames.first(), Some(&Frame::Open));
            prop_assert_eq!(frames.last(), Some(&Frame::Close(CloseInfo::go_away())));
            prop_assert_eq!(delivered, expected);
        }
    }
}

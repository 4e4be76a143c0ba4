//! Native WebSocket receiver.
//!
//! Full duplex: every frame goes out as one text message, and text messages
//! from the client (a JSON string or an array of strings) are routed into
//! the session's inbound queue.
//!
//! # Connection Lifecycle
//!
//! 1. [`accept`] - Upgrade a TCP stream
//! 2. [`serve_websocket`] - Split the stream, attach the sink half
//! 3. Reader task pushes inbound messages until the client goes away
//! 4. Session close or client close ends the attachment

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::Frame;
use crate::session::{AttachCoordinator, AttachOutcome, ServeOutcome, Session, reject};

use super::receiver::{Receiver, ReceiverKind};

// ============================================================================
// WebSocketReceiver
// ============================================================================

/// Sends frames as WebSocket text messages.
///
/// Not subject to the response limit.
#[derive(Debug)]
pub struct WebSocketReceiver<S> {
    sink: S,
    closed: bool,
}

impl<S> WebSocketReceiver<S>
where
    S: Sink<Message, Error = WsError> + Unpin + Send,
{
    /// Creates a receiver over the write half of a WebSocket.
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            closed: false,
        }
    }

    /// Returns a reference to the underlying sink.
    #[inline]
    #[must_use]
    pub fn get_ref(&self) -> &S {
        &self.sink
    }

    /// Consumes the receiver, returning the underlying sink.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> S {
        self.sink
    }
}

#[async_trait]
impl<S> Receiver for WebSocketReceiver<S>
where
    S: Sink<Message, Error = WsError> + Unpin + Send,
{
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::WebSocket
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.closed {
            return Err(Error::ReceiverClosed);
        }

        let text = frame.encode()?;
        if let Err(e) = self.sink.send(Message::Text(text.into())).await {
            self.closed = true;
            return Err(e.into());
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close().await?;
        Ok(())
    }

    fn can_send(&self) -> bool {
        !self.closed
    }
}

// ============================================================================
// Serving
// ============================================================================

/// Upgrades an accepted TCP stream to a WebSocket.
///
/// # Errors
///
/// Returns [`Error::WebSocket`] if the handshake fails.
pub async fn accept(stream: TcpStream) -> Result<WebSocketStream<TcpStream>> {
    let peer = stream.peer_addr().ok();
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    info!(?peer, "WebSocket connection established");
    Ok(ws_stream)
}

/// Serves session `id` over an established WebSocket.
///
/// Inbound text messages go to [`Session::recv`]. A client close or read
/// error interrupts the attachment; cancelling `cancel` does the same from
/// the server side.
pub async fn serve_websocket<T>(
    coordinator: &AttachCoordinator,
    id: &SessionId,
    ws_stream: WebSocketStream<T>,
    cancel: &CancellationToken,
) -> ServeOutcome
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws_stream.split();
    let mut receiver = WebSocketReceiver::new(sink);

    let (session, outcome) = coordinator.attach(id, ReceiverKind::WebSocket);
    let attachment = match outcome {
        AttachOutcome::Accepted(attachment) => attachment,
        AttachOutcome::Rejected(frame) => {
            reject(&mut receiver, &frame).await;
            return ServeOutcome::Rejected(frame);
        }
    };

    let connection = cancel.child_token();
    let reader = tokio::spawn(read_inbound(session, stream, connection.clone()));

    let reason = attachment.run(&mut receiver, &connection).await;

    connection.cancel();
    if let Err(e) = reader.await {
        warn!(error = %e, "WebSocket reader task failed");
    }

    ServeOutcome::Detached(reason)
}

/// Routes client messages into `session` until the connection ends.
async fn read_inbound<St>(session: Arc<Session>, mut stream: St, connection: CancellationToken)
where
    St: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            () = connection.cancelled() => break,
            message = stream.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                if let Err(e) = session.push_inbound_json(&text) {
                    if e.is_session_closed() {
                        break;
                    }
                    warn!(session_id = %session.id(), error = %e, "Inbound message rejected");
                }
            }

            Some(Ok(Message::Close(_))) => {
                debug!(session_id = %session.id(), "WebSocket closed by client");
                break;
            }

            Some(Err(e)) => {
                debug!(session_id = %session.id(), error = %e, "WebSocket read failed");
                break;
            }

            None => {
                debug!(session_id = %session.id(), "WebSocket stream ended");
                break;
            }

            // Ignore Binary, Ping, Pong
            _ => {}
        }
    }

    connection.cancel();
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::io::{DuplexStream, duplex};
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use crate::options::SessionOptions;
    use crate::protocol::CloseInfo;
    use crate::session::{DetachReason, Registry, SessionState};

    const WAIT: Duration = Duration::from_secs(1);

    async fn socket_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server, client) = duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        (server, client)
    }

    async fn next_text<S>(client: &mut S) -> String
    where
        S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    {
        loop {
            let message = timeout(WAIT, client.next())
                .await
                .expect("no message")
                .expect("stream ended")
                .expect("read failed");
            if let Message::Text(text) = message {
                return text.as_str().to_owned();
            }
        }
    }

    fn coordinator() -> AttachCoordinator {
        AttachCoordinator::new(Registry::new(SessionOptions::new()).unwrap())
    }

    #[tokio::test]
    async fn test_frames_and_inbound_messages() {
        let coordinator = coordinator();
        let session_id = SessionId::new("ws").unwrap();
        let (server, mut client) = socket_pair().await;

        let task = {
            let coordinator = coordinator.clone();
            let session_id = session_id.clone();
            tokio::spawn(async move {
                serve_websocket(&coordinator, &session_id, server, &CancellationToken::new()).await
            })
        };

        assert_eq!(next_text(&mut client).await, "o");

        let session = coordinator.registry().get(&session_id).unwrap();
        client
            .send(Message::Text(r#"["hello","again"]"#.into()))
            .await
            .unwrap();
        assert_eq!(session.recv().await.as_deref(), Some("hello"));
        assert_eq!(session.recv().await.as_deref(), Some("again"));

        session.enqueue_message("world").unwrap();
        assert_eq!(next_text(&mut client).await, r#"a["world"]"#);

        session.close(3000, "Go away!");
        assert_eq!(next_text(&mut client).await, r#"c[3000,"Go away!"]"#);

        let outcome = timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(outcome, ServeOutcome::Detached(DetachReason::Closed));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_client_close_interrupts_session() {
        let coordinator = coordinator();
        let session_id = SessionId::new("ws-close").unwrap();
        let (server, mut client) = socket_pair().await;

        let task = {
            let coordinator = coordinator.clone();
            let session_id = session_id.clone();
            tokio::spawn(async move {
                serve_websocket(&coordinator, &session_id, server, &CancellationToken::new()).await
            })
        };

        assert_eq!(next_text(&mut client).await, "o");
        client.close(None).await.unwrap();

        let outcome = timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(outcome, ServeOutcome::Detached(DetachReason::Interrupted));

        let session = coordinator.registry().get(&session_id).unwrap();
        assert_eq!(session.close_info(), Some(CloseInfo::interrupted()));
    }

    #[tokio::test]
    async fn test_rejected_when_another_receiver_attached() {
        let coordinator = coordinator();
        let session_id = SessionId::new("ws-busy").unwrap();
        let (_session, outcome) = coordinator.attach(&session_id, ReceiverKind::XhrStreaming);
        assert!(outcome.is_accepted());

        let (server, mut client) = socket_pair().await;
        let outcome =
            serve_websocket(&coordinator, &session_id, server, &CancellationToken::new()).await;

        assert_eq!(
            outcome,
            ServeOutcome::Rejected(Frame::Close(CloseInfo::another_connection()))
        );
        assert_eq!(
            next_text(&mut client).await,
            r#"c[2010,"Another connection still open"]"#
        );
    }

    #[tokio::test]
    async fn test_accept_over_tcp() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("ws://{}", listener.local_addr()?);
        let coordinator = coordinator();

        let server = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                let (stream, _) = listener.accept().await?;
                let ws_stream = accept(stream).await?;
                let session_id = SessionId::new("tcp")?;
                let outcome =
                    serve_websocket(&coordinator, &session_id, ws_stream, &CancellationToken::new())
                        .await;
                anyhow::Ok(outcome)
            })
        };

        let (mut client, _) = tokio_tungstenite::connect_async(url).await?;
        assert_eq!(next_text(&mut client).await, "o");

        client.close(None).await?;
        let outcome = timeout(WAIT, server).await???;
        assert_eq!(outcome, ServeOutcome::Detached(DetachReason::Interrupted));
        Ok(())
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (server, _client) = socket_pair().await;
        let (sink, _stream) = server.split();
        let mut receiver = WebSocketReceiver::new(sink);

        receiver.close().await.unwrap();
        assert!(!receiver.can_send());
        assert!(matches!(
            receiver.send_frame(&Frame::Heartbeat).await,
            Err(Error::ReceiverClosed)
        ));
    }
}

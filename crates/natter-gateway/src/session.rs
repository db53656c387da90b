use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message as WsMessage;
use futures_util::future::BoxFuture;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use natter_types::events::SocketRequest;
use natter_types::models::{Message, Username};

use crate::GatewayError;
use crate::dispatcher::Dispatcher;
use crate::registry::{ConnHandle, Outbound, Registry};

/// Outbound queue depth. One slot: a slow reader stalls whoever is
/// delivering to it instead of piling messages up in memory.
pub const OUTBOUND_CAPACITY: usize = 1;

/// Push `msg` onto a session's outbound queue, giving up if `cancel` fires
/// first. Waits while the queue is full.
pub async fn send_cancellable(
    outbound: &Outbound,
    msg: Message,
    cancel: &CancellationToken,
) -> Result<(), GatewayError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        sent = outbound.send(msg) => sent.map_err(|_| GatewayError::Closed),
    }
}

/// Lifecycle of a session once its loops have been spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Both loops running.
    Active,
    /// Cancelled; loops are on their way out.
    Closing,
    /// Both loops have returned.
    Terminated,
}

/// One user's live connection: its outbound queue, its cancellation token and
/// the two loop tasks serving it.
pub struct SessionHandle {
    username: Username,
    session_id: Uuid,
    outbound: Outbound,
    cancel: CancellationToken,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

impl SessionHandle {
    pub(crate) fn new(
        username: Username,
        session_id: Uuid,
        outbound: Outbound,
        cancel: CancellationToken,
        read_task: JoinHandle<()>,
        write_task: JoinHandle<()>,
    ) -> Self {
        Self {
            username,
            session_id,
            outbound,
            cancel,
            read_task,
            write_task,
        }
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn state(&self) -> SessionState {
        if self.read_task.is_finished() && self.write_task.is_finished() {
            SessionState::Terminated
        } else if self.cancel.is_cancelled() {
            SessionState::Closing
        } else {
            SessionState::Active
        }
    }

    /// Wait for both loops to return.
    pub async fn join(self) {
        for (name, task) in [("read", self.read_task), ("write", self.write_task)] {
            if let Err(e) = task.await {
                error!("{} {} loop failed: {}", self.username, name, e);
            }
        }
    }
}

/// Write half of a connection, shared between the write loop and the
/// registry (for forced close at shutdown).
pub(crate) struct SharedSink<Si> {
    inner: Arc<Mutex<Si>>,
}

impl<Si> Clone for SharedSink<Si> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Si> SharedSink<Si>
where
    Si: Sink<WsMessage> + Unpin + Send,
    Si::Error: Display,
{
    pub(crate) fn new(sink: Si) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
        }
    }

    async fn send_text(&self, text: String) -> Result<(), GatewayError> {
        let mut sink = self.inner.lock().await;
        sink.send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }
}

impl<Si> ConnHandle for SharedSink<Si>
where
    Si: Sink<WsMessage> + Unpin + Send,
    Si::Error: Display,
{
    fn close(&self) -> BoxFuture<'_, Result<(), GatewayError>> {
        Box::pin(async move {
            let mut sink = self.inner.lock().await;
            sink.close()
                .await
                .map_err(|e| GatewayError::Transport(e.to_string()))
        })
    }
}

/// What a read loop needs besides the socket itself.
pub(crate) struct ReadContext {
    pub username: Username,
    pub session_id: Uuid,
    pub cancel: CancellationToken,
    pub dispatcher: Dispatcher,
    pub registry: Registry,
}

/// Decode inbound frames and dispatch them one at a time until the socket
/// closes, a fatal decode error occurs, or the session is cancelled.
pub(crate) async fn read_loop<St, E>(mut stream: St, ctx: ReadContext)
where
    St: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    let ReadContext {
        username,
        session_id,
        cancel,
        dispatcher,
        registry,
    } = ctx;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => match SocketRequest::decode(text.as_str()) {
                Ok(request) => {
                    debug!("{} sent {}", username, request.kind());
                    dispatcher.dispatch(&username, request, &cancel).await;
                }
                Err(e) if e.is_fatal() => {
                    warn!(
                        "{} bad request: {} -- raw: {}",
                        username,
                        e,
                        text.as_str().chars().take(200).collect::<String>()
                    );
                    break;
                }
                Err(e) => error!("{} {}", username, e),
            },
            Some(Ok(WsMessage::Binary(data))) => {
                warn!("{} sent unsupported binary frame ({} bytes)", username, data.len());
            }
            Some(Ok(WsMessage::Close(frame))) => {
                info!("{} closed the connection: {:?}", username, frame);
                break;
            }
            // Ping/Pong are answered by the transport.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("{} receive error: {}", username, e);
                break;
            }
            None => {
                info!("{} connection stream ended", username);
                break;
            }
        }
    }

    registry.remove_session(&username, session_id).await;
    cancel.cancel();
    info!("disconnected from user {}", username);
}

/// Serialize queued messages onto the socket until cancelled. A failed write
/// cancels the whole session.
pub(crate) async fn write_loop<Si>(
    sink: SharedSink<Si>,
    mut outbound: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    username: Username,
) where
    Si: Sink<WsMessage> + Unpin + Send,
    Si::Error: Display,
{
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = outbound.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        if let Err(e) = write_message(&sink, &msg).await {
            match &e {
                GatewayError::Encode(_) => {
                    error!("{} unable to encode message {}: {}", username, msg.id, e)
                }
                _ => warn!("{} write failed: {}", username, e),
            }
            cancel.cancel();
            break;
        }
    }
}

async fn write_message<Si>(sink: &SharedSink<Si>, msg: &Message) -> Result<(), GatewayError>
where
    Si: Sink<WsMessage> + Unpin + Send,
    Si::Error: Display,
{
    let text = serde_json::to_string(msg)?;
    sink.send_text(text).await
}

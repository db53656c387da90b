use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message as WsMessage;
use futures_util::{Sink, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use natter_types::models::Username;

use crate::dispatcher::Dispatcher;
use crate::registry::{Registration, Registry};
use crate::session::{
    OUTBOUND_CAPACITY, ReadContext, SessionHandle, SharedSink, read_loop, send_cancellable,
    write_loop,
};
use crate::store::{Store, run_blocking};

/// Entry point for the transport layer: turns authenticated sockets into
/// registered sessions and tears everything down at shutdown.
#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn Store>,
    registry: Registry,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let registry = Registry::new();
        let dispatcher = Dispatcher::new(Arc::clone(&store), registry.clone());
        Self {
            store,
            registry,
            dispatcher,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Start serving an upgraded socket for `username`.
    pub async fn connect<S, E>(&self, username: Username, socket: S) -> SessionHandle
    where
        S: Stream<Item = Result<WsMessage, E>> + Sink<WsMessage> + Send + 'static,
        <S as Sink<WsMessage>>::Error: Display + Send,
        E: Display + Send + 'static,
    {
        let (sink, stream) = socket.split();
        self.connect_parts(username, sink, stream).await
    }

    /// [`connect`](Self::connect) for a transport that is already split.
    pub async fn connect_parts<Si, St, E>(
        &self,
        username: Username,
        sink: Si,
        stream: St,
    ) -> SessionHandle
    where
        Si: Sink<WsMessage> + Unpin + Send + 'static,
        Si::Error: Display + Send,
        St: Stream<Item = Result<WsMessage, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        // Child of the shutdown token: process shutdown reaches every session.
        let cancel = self.shutdown.child_token();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let session_id = Uuid::new_v4();
        let sink = SharedSink::new(sink);

        let write_task = tokio::spawn(write_loop(
            sink.clone(),
            outbound_rx,
            cancel.clone(),
            username.clone(),
        ));
        let read_task = tokio::spawn(read_loop(
            stream,
            ReadContext {
                username: username.clone(),
                session_id,
                cancel: cancel.clone(),
                dispatcher: self.dispatcher.clone(),
                registry: self.registry.clone(),
            },
        ));

        self.registry
            .put(
                username.clone(),
                Registration {
                    session_id,
                    outbound: outbound.clone(),
                    cancel: cancel.clone(),
                    conn: Some(Arc::new(sink)),
                },
            )
            .await;

        // The read loop may already have ended before we registered.
        if cancel.is_cancelled() {
            self.registry.remove_session(&username, session_id).await;
        }

        info!("connected to user {} (session {})", username, session_id);

        SessionHandle::new(username, session_id, outbound, cancel, read_task, write_task)
    }

    /// Push every unread message for the session's user onto its outbound
    /// queue, newest first. Runs alongside live delivery with no ordering
    /// barrier between the two. Returns how many were queued.
    pub async fn replay_unread(&self, session: &SessionHandle) -> usize {
        let username = session.username().clone();
        let messages = match run_blocking(&self.store, move |store| {
            store.list_unread_messages(&username)
        })
        .await
        {
            Ok(messages) => messages,
            Err(e) => {
                error!("unable to load unread messages for {}: {:#}", session.username(), e);
                return 0;
            }
        };

        let total = messages.len();
        let mut replayed = 0;
        for msg in messages {
            if let Err(e) = send_cancellable(session.outbound(), msg, session.cancel_token()).await {
                warn!(
                    "replay to {} stopped after {}/{}: {}",
                    session.username(),
                    replayed,
                    total,
                    e
                );
                break;
            }
            replayed += 1;
        }

        info!("replayed {} unread messages to {}", replayed, session.username());
        replayed
    }

    /// Cancel every session and close every connection. Called once.
    pub async fn shutdown(&self) {
        let online = self.registry.online_users().await;
        info!("shutting down {} sessions", online.len());
        debug!("closing sessions for {:?}", online);
        self.shutdown.cancel();
        self.registry.shutdown_all().await;
    }
}

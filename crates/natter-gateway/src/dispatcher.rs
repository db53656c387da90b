use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use natter_types::events::SocketRequest;
use natter_types::models::{Message, Username};

use crate::registry::Registry;
use crate::session::send_cancellable;
use crate::store::{Store, run_blocking};

/// Why a send was dropped without being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    UnknownRecipient,
    LookupFailed,
}

/// What became of one dispatched request. Never reported back over the
/// socket; used for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Sent {
        message: Message,
        persisted: bool,
        delivered: bool,
    },
    Dropped(DropReason),
    ThreadRead {
        updated: usize,
    },
    ThreadReadFailed,
}

/// Routes decoded socket requests to storage and to online recipients.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn Store>,
    registry: Registry,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, registry: Registry) -> Self {
        Self { store, registry }
    }

    /// Handle one request from `caller`. `cancel` is the caller's session
    /// token; a blocked live delivery gives up when it fires.
    pub async fn dispatch(
        &self,
        caller: &Username,
        request: SocketRequest,
        cancel: &CancellationToken,
    ) -> Outcome {
        match request {
            SocketRequest::SendMessage { content, recipient } => {
                self.send_message(caller, recipient, content, cancel).await
            }
            SocketRequest::ReadThread { sender } => self.read_thread(caller, sender).await,
        }
    }

    async fn send_message(
        &self,
        sender: &Username,
        recipient: Username,
        content: String,
        cancel: &CancellationToken,
    ) -> Outcome {
        let message = Message::new(sender.clone(), recipient, content, Utc::now());

        let lookup = {
            let recipient = message.recipient.clone();
            run_blocking(&self.store, move |store| store.find_user(&recipient)).await
        };
        match lookup {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!(
                    "unable to find user {}, dropping message from {}",
                    message.recipient, sender
                );
                return Outcome::Dropped(DropReason::UnknownRecipient);
            }
            Err(e) => {
                error!("user lookup for {} failed: {:#}", message.recipient, e);
                return Outcome::Dropped(DropReason::LookupFailed);
            }
        }

        // Not atomic with delivery: a failed insert is logged and the
        // message is still handed to an online recipient.
        let persisted = {
            let stored = message.clone();
            match run_blocking(&self.store, move |store| store.append_message(&stored)).await {
                Ok(()) => true,
                Err(e) => {
                    error!("unable to store message {}: {:#}", message.id, e);
                    false
                }
            }
        };

        let delivered = match self.registry.lookup(&message.recipient).await {
            Some(outbound) => match send_cancellable(&outbound, message.clone(), cancel).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        "live delivery {} -> {} abandoned: {}",
                        sender, message.recipient, e
                    );
                    false
                }
            },
            None => false,
        };

        info!(
            "message {} from {} to {} (persisted={}, delivered={})",
            &message.id[..12],
            sender,
            message.recipient,
            persisted,
            delivered
        );

        Outcome::Sent {
            message,
            persisted,
            delivered,
        }
    }

    async fn read_thread(&self, recipient: &Username, sender: Username) -> Outcome {
        let result = {
            let recipient = recipient.clone();
            let sender = sender.clone();
            run_blocking(&self.store, move |store| {
                store.mark_thread_read(&recipient, &sender)
            })
            .await
        };

        match result {
            Ok(updated) => {
                info!(
                    "marked thread sent by {} to {} as read ({} messages)",
                    sender, recipient, updated
                );
                Outcome::ThreadRead { updated }
            }
            Err(e) => {
                error!(
                    "cannot mark thread sent by {} to {} as read: {:#}",
                    sender, recipient, e
                );
                Outcome::ThreadReadFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::anyhow;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use natter_types::models::User;

    use crate::registry::Registration;

    /// In-memory store that records every call.
    #[derive(Default)]
    struct RecordingStore {
        users: HashSet<String>,
        fail_append: bool,
        appended: Mutex<Vec<Message>>,
        read_marks: Mutex<Vec<(Username, Username)>>,
    }

    impl RecordingStore {
        fn with_users(names: &[&str]) -> Self {
            Self {
                users: names.iter().map(|n| n.to_string()).collect(),
                ..Default::default()
            }
        }

        fn appended(&self) -> Vec<Message> {
            self.appended.lock().unwrap().clone()
        }
    }

    impl Store for RecordingStore {
        fn find_user(&self, username: &Username) -> anyhow::Result<Option<User>> {
            Ok(self.users.contains(username.as_str()).then(|| User {
                username: username.clone(),
                password: String::new(),
            }))
        }

        fn append_message(&self, msg: &Message) -> anyhow::Result<()> {
            if self.fail_append {
                return Err(anyhow!("disk full"));
            }
            self.appended.lock().unwrap().push(msg.clone());
            Ok(())
        }

        fn mark_thread_read(&self, recipient: &Username, sender: &Username) -> anyhow::Result<usize> {
            self.read_marks
                .lock()
                .unwrap()
                .push((recipient.clone(), sender.clone()));
            Ok(1)
        }

        fn list_unread_messages(&self, _recipient: &Username) -> anyhow::Result<Vec<Message>> {
            Ok(Vec::new())
        }
    }

    async fn register(registry: &Registry, name: &str) -> (mpsc::Receiver<Message>, CancellationToken) {
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        registry
            .put(
                name.into(),
                Registration {
                    session_id: Uuid::new_v4(),
                    outbound: tx,
                    cancel: cancel.clone(),
                    conn: None,
                },
            )
            .await;
        (rx, cancel)
    }

    fn send(content: &str, recipient: &str) -> SocketRequest {
        SocketRequest::SendMessage {
            content: content.into(),
            recipient: recipient.into(),
        }
    }

    #[tokio::test]
    async fn online_recipient_gets_the_stored_message() {
        let store = Arc::new(RecordingStore::with_users(&["alice", "bob"]));
        let registry = Registry::new();
        let (mut alice_rx, _) = register(&registry, "alice").await;
        let dispatcher = Dispatcher::new(store.clone(), registry);

        let outcome = dispatcher
            .dispatch(&"bob".into(), send("hi", "alice"), &CancellationToken::new())
            .await;

        let (message, persisted, delivered) = match outcome {
            Outcome::Sent { message, persisted, delivered } => (message, persisted, delivered),
            other => panic!("expected Sent, got {other:?}"),
        };
        assert!(persisted);
        assert!(delivered);
        assert_eq!(message.sender.as_str(), "bob");
        assert_eq!(message.recipient.as_str(), "alice");
        assert_eq!(message.content, "hi");
        assert!(!message.read);

        let stored = store.appended();
        assert_eq!(stored, vec![message.clone()]);
        assert_eq!(alice_rx.recv().await, Some(message));
    }

    #[tokio::test]
    async fn offline_recipient_is_only_stored() {
        let store = Arc::new(RecordingStore::with_users(&["bob", "carol"]));
        let dispatcher = Dispatcher::new(store.clone(), Registry::new());

        let outcome = dispatcher
            .dispatch(&"bob".into(), send("later", "carol"), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, Outcome::Sent { persisted: true, delivered: false, .. }));
        assert_eq!(store.appended().len(), 1);
    }

    #[tokio::test]
    async fn unknown_recipient_is_dropped_silently() {
        let store = Arc::new(RecordingStore::with_users(&["bob"]));
        let registry = Registry::new();
        // online but unknown to storage: still dropped
        let (mut ghost_rx, _) = register(&registry, "ghost").await;
        let dispatcher = Dispatcher::new(store.clone(), registry);

        let outcome = dispatcher
            .dispatch(&"bob".into(), send("boo", "ghost"), &CancellationToken::new())
            .await;

        assert_eq!(outcome, Outcome::Dropped(DropReason::UnknownRecipient));
        assert!(store.appended().is_empty());
        assert!(ghost_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_append_still_delivers() {
        let store = Arc::new(RecordingStore {
            fail_append: true,
            ..RecordingStore::with_users(&["alice", "bob"])
        });
        let registry = Registry::new();
        let (mut alice_rx, _) = register(&registry, "alice").await;
        let dispatcher = Dispatcher::new(store.clone(), registry);

        let outcome = dispatcher
            .dispatch(&"bob".into(), send("hi", "alice"), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, Outcome::Sent { persisted: false, delivered: true, .. }));
        assert!(alice_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn blocked_delivery_gives_up_on_sender_cancel() {
        let store = Arc::new(RecordingStore::with_users(&["alice", "bob"]));
        let registry = Registry::new();
        let (_alice_rx, _) = register(&registry, "alice").await;
        let dispatcher = Dispatcher::new(store.clone(), registry);
        let cancel = CancellationToken::new();

        // fills the single slot; nobody drains it
        dispatcher.dispatch(&"bob".into(), send("one", "alice"), &cancel).await;

        let blocked = {
            let dispatcher = dispatcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                dispatcher.dispatch(&"bob".into(), send("two", "alice"), &cancel).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        cancel.cancel();
        let outcome = blocked.await.unwrap();
        assert!(matches!(outcome, Outcome::Sent { persisted: true, delivered: false, .. }));
        assert_eq!(store.appended().len(), 2);
    }

    #[tokio::test]
    async fn closed_recipient_channel_is_not_delivered() {
        let store = Arc::new(RecordingStore::with_users(&["alice", "bob"]));
        let registry = Registry::new();
        let (alice_rx, _) = register(&registry, "alice").await;
        drop(alice_rx);
        let dispatcher = Dispatcher::new(store, registry);

        let outcome = dispatcher
            .dispatch(&"bob".into(), send("hi", "alice"), &CancellationToken::new())
            .await;
        assert!(matches!(outcome, Outcome::Sent { delivered: false, .. }));
    }

    #[tokio::test]
    async fn read_thread_marks_the_callers_pair() {
        let store = Arc::new(RecordingStore::with_users(&["alice", "bob"]));
        let dispatcher = Dispatcher::new(store.clone(), Registry::new());

        let outcome = dispatcher
            .dispatch(
                &"alice".into(),
                SocketRequest::ReadThread { sender: "bob".into() },
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome, Outcome::ThreadRead { updated: 1 });
        let marks = store.read_marks.lock().unwrap().clone();
        assert_eq!(marks, vec![("alice".into(), "bob".into())]);
    }
}

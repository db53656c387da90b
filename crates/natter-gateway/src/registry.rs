use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use natter_types::models::{Message, Username};

use crate::GatewayError;

/// Upper bound on one forced close during shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sending half of a session's outbound queue.
pub type Outbound = mpsc::Sender<Message>;

/// Lets the registry force a live connection closed at shutdown.
pub trait ConnHandle: Send + Sync {
    fn close(&self) -> BoxFuture<'_, Result<(), GatewayError>>;
}

/// Everything the registry keeps for one online user.
#[derive(Clone)]
pub struct Registration {
    pub session_id: Uuid,
    pub outbound: Outbound,
    pub cancel: CancellationToken,
    pub conn: Option<Arc<dyn ConnHandle>>,
}

/// Currently reachable users and their live delivery handles.
/// At most one entry per username.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<Username, Registration>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the entry for `username`. Returns true if an entry
    /// was replaced. The replaced session is NOT cancelled; it keeps running
    /// until its own socket fails.
    pub async fn put(&self, username: Username, registration: Registration) -> bool {
        let replaced = self
            .inner
            .write()
            .await
            .insert(username.clone(), registration);

        match replaced {
            Some(old) => {
                warn!(
                    "{} replaced session {} without closing it",
                    username, old.session_id
                );
                true
            }
            None => false,
        }
    }

    /// Outbound channel for `username`, if online. The lock is released
    /// before the caller sends.
    pub async fn lookup(&self, username: &Username) -> Option<Outbound> {
        self.inner
            .read()
            .await
            .get(username)
            .map(|entry| entry.outbound.clone())
    }

    pub async fn is_online(&self, username: &Username) -> bool {
        self.inner.read().await.contains_key(username)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn online_users(&self) -> Vec<Username> {
        let mut users: Vec<Username> = self.inner.read().await.keys().cloned().collect();
        users.sort();
        users
    }

    /// Cancel and drop the entry for `username`. Idempotent.
    pub async fn remove(&self, username: &Username) -> bool {
        let mut entries = self.inner.write().await;
        match entries.remove(username) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Like [`remove`](Self::remove), but only if the entry still belongs to
    /// `session_id`. A replaced session tearing down must not evict its
    /// successor.
    pub async fn remove_session(&self, username: &Username, session_id: Uuid) -> bool {
        let mut entries = self.inner.write().await;
        let is_current = entries
            .get(username)
            .is_some_and(|entry| entry.session_id == session_id);

        if !is_current {
            return false;
        }

        if let Some(entry) = entries.remove(username) {
            entry.cancel.cancel();
        }
        true
    }

    /// Cancel every session, try to close every connection, empty the map.
    /// Close failures are logged and skipped.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(Username, Registration)> =
            self.inner.write().await.drain().collect();

        for (username, entry) in drained {
            entry.cancel.cancel();

            let Some(conn) = entry.conn else {
                continue;
            };

            // A write stuck on a dead peer holds the sink; don't wait on it forever.
            match tokio::time::timeout(CLOSE_TIMEOUT, conn.close()).await {
                Ok(Ok(())) => info!("disconnected from user {}", username),
                Ok(Err(e)) => warn!("unable to disconnect from user {}: {}", username, e),
                Err(_) => warn!("unable to disconnect from user {}: close timed out", username),
            }
        }
    }
}

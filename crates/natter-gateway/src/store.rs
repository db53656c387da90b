use std::sync::Arc;

use anyhow::Result;

use natter_db::Database;
use natter_types::models::{Message, User, Username};

/// The slice of persistence the gateway needs. Implementations are
/// synchronous and do their own serialization; callers run them on the
/// blocking pool.
pub trait Store: Send + Sync + 'static {
    fn find_user(&self, username: &Username) -> Result<Option<User>>;

    fn append_message(&self, msg: &Message) -> Result<()>;

    fn mark_thread_read(&self, recipient: &Username, sender: &Username) -> Result<usize>;

    /// Newest first.
    fn list_unread_messages(&self, recipient: &Username) -> Result<Vec<Message>>;
}

impl Store for Database {
    fn find_user(&self, username: &Username) -> Result<Option<User>> {
        Ok(Database::find_user(self, username)?)
    }

    fn append_message(&self, msg: &Message) -> Result<()> {
        Ok(Database::append_message(self, msg)?)
    }

    fn mark_thread_read(&self, recipient: &Username, sender: &Username) -> Result<usize> {
        Ok(Database::mark_thread_read(self, recipient, sender)?)
    }

    fn list_unread_messages(&self, recipient: &Username) -> Result<Vec<Message>> {
        Ok(Database::list_unread_messages(self, recipient)?)
    }
}

/// Run a store call off the async runtime.
pub(crate) async fn run_blocking<T, F>(store: &Arc<dyn Store>, f: F) -> Result<T>
where
    F: FnOnce(&dyn Store) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref())).await?
}

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};

use natter_types::models::{Message, Thread, User, Username, format_timestamp};

use crate::models::{MessageRow, ThreadRow, UserRow};
use crate::{Database, DbError, Result};

const MESSAGE_COLUMNS: &str = "id, sent_at, content, sender, recipient, read";

impl Database {
    // -- Users --

    pub fn find_user(&self, username: &Username) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, username))
    }

    /// Insert a user; the password must already be hashed.
    pub fn create_user(&self, user: &User) -> Result<()> {
        self.with_conn(|conn| {
            match conn.execute(
                "INSERT INTO users (username, password) VALUES (?1, ?2)",
                params![user.username.as_str(), user.password],
            ) {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(DbError::UserExists(user.username.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    // -- Messages --

    pub fn append_message(&self, msg: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sent_at, content, sender, recipient, read)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    msg.id,
                    format_timestamp(&msg.sent_at),
                    msg.content,
                    msg.sender.as_str(),
                    msg.recipient.as_str(),
                    msg.read,
                ],
            )?;
            Ok(())
        })
    }

    /// Mark every message from `sender` to `recipient` as read.
    /// Returns the number of rows that changed.
    pub fn mark_thread_read(&self, recipient: &Username, sender: &Username) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET read = 1
                 WHERE recipient = ?1 AND sender = ?2 AND read = 0",
                params![recipient.as_str(), sender.as_str()],
            )?;
            Ok(updated)
        })
    }

    /// Threads for `recipient`, most recently active first.
    pub fn list_threads(&self, recipient: &Username, limit: u32, offset: u32) -> Result<Vec<Thread>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sender, MAX(sent_at), MIN(read)
                 FROM messages
                 WHERE recipient = ?1
                 GROUP BY sender
                 ORDER BY MAX(sent_at) DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(params![recipient.as_str(), limit, offset], ThreadRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(ThreadRow::into_thread).collect()
    }

    /// Messages from `sender` to `recipient`, newest first.
    pub fn list_thread_messages(
        &self,
        recipient: &Username,
        sender: &Username,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let rows = self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE recipient = ?1 AND sender = ?2
                 ORDER BY sent_at DESC
                 LIMIT ?3 OFFSET ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![recipient.as_str(), sender.as_str(), limit, offset],
                    MessageRow::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Every unread message addressed to `recipient`, newest first.
    pub fn list_unread_messages(&self, recipient: &Username) -> Result<Vec<Message>> {
        let rows = self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE recipient = ?1 AND read = 0
                 ORDER BY sent_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![recipient.as_str()], MessageRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }
}

fn query_user(conn: &Connection, username: &Username) -> Result<Option<User>> {
    let mut stmt = conn.prepare("SELECT username, password FROM users WHERE username = ?1")?;

    let row = stmt
        .query_row([username.as_str()], UserRow::from_row)
        .optional()?;

    Ok(row.map(UserRow::into_user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn db_with_users(names: &[&str]) -> Database {
        let db = Database::open_in_memory().unwrap();
        for name in names {
            db.create_user(&User {
                username: (*name).into(),
                password: "hash".into(),
            })
            .unwrap();
        }
        db
    }

    fn msg(sender: &str, recipient: &str, content: &str, secs: i64) -> Message {
        let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Message::new(sender.into(), recipient.into(), content.into(), base + Duration::seconds(secs))
    }

    #[test]
    fn create_and_find_user() {
        let db = db_with_users(&["alice"]);
        let user = db.find_user(&"alice".into()).unwrap().unwrap();
        assert_eq!(user.username.as_str(), "alice");
        assert_eq!(user.password, "hash");
        assert!(db.find_user(&"Alice".into()).unwrap().is_none());
    }

    #[test]
    fn duplicate_user_is_reported() {
        let db = db_with_users(&["alice"]);
        let err = db
            .create_user(&User {
                username: "alice".into(),
                password: "other".into(),
            })
            .unwrap_err();
        assert!(matches!(err, DbError::UserExists(ref u) if u.as_str() == "alice"));
    }

    #[test]
    fn append_and_list_thread_newest_first() {
        let db = db_with_users(&["alice", "bob"]);
        let first = msg("bob", "alice", "one", 0);
        let second = msg("bob", "alice", "two", 5);
        db.append_message(&first).unwrap();
        db.append_message(&second).unwrap();

        let listed = db
            .list_thread_messages(&"alice".into(), &"bob".into(), 15, 0)
            .unwrap();
        assert_eq!(listed, vec![second.clone(), first.clone()]);

        let page = db
            .list_thread_messages(&"alice".into(), &"bob".into(), 1, 1)
            .unwrap();
        assert_eq!(page, vec![first]);
    }

    #[test]
    fn duplicate_message_id_is_rejected() {
        let db = db_with_users(&["alice", "bob"]);
        let m = msg("bob", "alice", "hi", 0);
        db.append_message(&m).unwrap();
        assert!(db.append_message(&m).is_err());
    }

    #[test]
    fn mark_thread_read_only_touches_the_pair() {
        let db = db_with_users(&["alice", "bob", "carol"]);
        db.append_message(&msg("bob", "alice", "a", 0)).unwrap();
        db.append_message(&msg("bob", "alice", "b", 1)).unwrap();
        db.append_message(&msg("carol", "alice", "c", 2)).unwrap();
        db.append_message(&msg("alice", "bob", "d", 3)).unwrap();

        assert_eq!(db.mark_thread_read(&"alice".into(), &"bob".into()).unwrap(), 2);
        // already read rows are not counted again
        assert_eq!(db.mark_thread_read(&"alice".into(), &"bob".into()).unwrap(), 0);

        let from_bob = db
            .list_thread_messages(&"alice".into(), &"bob".into(), 15, 0)
            .unwrap();
        assert!(from_bob.iter().all(|m| m.read));

        let from_carol = db
            .list_thread_messages(&"alice".into(), &"carol".into(), 15, 0)
            .unwrap();
        assert!(from_carol.iter().all(|m| !m.read));

        let to_bob = db
            .list_thread_messages(&"bob".into(), &"alice".into(), 15, 0)
            .unwrap();
        assert!(to_bob.iter().all(|m| !m.read));
    }

    #[test]
    fn unread_messages_newest_first() {
        let db = db_with_users(&["alice", "bob", "carol"]);
        let old = msg("bob", "alice", "old", 0);
        let new = msg("carol", "alice", "new", 10);
        db.append_message(&old).unwrap();
        db.append_message(&new).unwrap();
        db.append_message(&msg("alice", "bob", "elsewhere", 20)).unwrap();

        let unread = db.list_unread_messages(&"alice".into()).unwrap();
        assert_eq!(unread, vec![new, old]);

        db.mark_thread_read(&"alice".into(), &"carol".into()).unwrap();
        let unread = db.list_unread_messages(&"alice".into()).unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].sender.as_str(), "bob");
    }

    #[test]
    fn threads_aggregate_per_sender() {
        let db = db_with_users(&["alice", "bob", "carol"]);
        db.append_message(&msg("bob", "alice", "a", 0)).unwrap();
        db.append_message(&msg("bob", "alice", "b", 30)).unwrap();
        db.append_message(&msg("carol", "alice", "c", 10)).unwrap();
        db.mark_thread_read(&"alice".into(), &"carol".into()).unwrap();

        let threads = db.list_threads(&"alice".into(), 15, 0).unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].sender.as_str(), "bob");
        assert_eq!(threads[0].time, msg("bob", "alice", "b", 30).sent_at);
        assert!(!threads[0].read);
        assert_eq!(threads[1].sender.as_str(), "carol");
        assert!(threads[1].read);

        // one unread message keeps the whole thread unread
        db.mark_thread_read(&"alice".into(), &"bob".into()).unwrap();
        db.append_message(&msg("bob", "alice", "later", 40)).unwrap();
        let threads = db.list_threads(&"alice".into(), 1, 0).unwrap();
        assert_eq!(threads.len(), 1);
        assert!(!threads[0].read);
    }
}

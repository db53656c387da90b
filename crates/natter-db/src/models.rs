//! Database row types. These map directly to SQLite rows and are converted
//! into the shared `natter-types` models at the edge of this crate.

use chrono::{DateTime, Utc};
use rusqlite::Row;

use natter_types::models::{Message, Thread, User};

use crate::{DbError, Result};

pub struct UserRow {
    pub username: String,
    pub password: String,
}

impl UserRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            username: row.get(0)?,
            password: row.get(1)?,
        })
    }

    pub fn into_user(self) -> User {
        User {
            username: self.username.into(),
            password: self.password,
        }
    }
}

pub struct MessageRow {
    pub id: String,
    pub sent_at: String,
    pub content: String,
    pub sender: String,
    pub recipient: String,
    pub read: bool,
}

impl MessageRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sent_at: row.get(1)?,
            content: row.get(2)?,
            sender: row.get(3)?,
            recipient: row.get(4)?,
            read: row.get(5)?,
        })
    }

    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: self.id,
            sent_at: parse_timestamp(self.sent_at)?,
            content: self.content,
            sender: self.sender.into(),
            recipient: self.recipient.into(),
            read: self.read,
        })
    }
}

/// One row of the per-sender aggregate over a recipient's inbox.
pub struct ThreadRow {
    pub sender: String,
    pub last_sent_at: String,
    pub all_read: bool,
}

impl ThreadRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sender: row.get(0)?,
            last_sent_at: row.get(1)?,
            all_read: row.get(2)?,
        })
    }

    pub fn into_thread(self) -> Result<Thread> {
        Ok(Thread {
            time: parse_timestamp(self.last_sent_at)?,
            sender: self.sender.into(),
            read: self.all_read,
        })
    }
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(&value) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(source) => Err(DbError::Timestamp { value, source }),
    }
}

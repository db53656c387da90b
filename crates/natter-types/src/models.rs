use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Case-sensitive user identity. Key for both storage and the online registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Username {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for Username {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Username {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: Username,
    /// Argon2 PHC string. Never serialized back to clients.
    #[serde(skip_serializing)]
    pub password: String,
}

/// A direct message. `id` is content-derived and assigned once at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sent_at: DateTime<Utc>,
    pub content: String,
    pub sender: Username,
    pub recipient: Username,
    pub read: bool,
}

impl Message {
    /// Build a fresh, unread message and stamp its id. `sent_at` is cut to
    /// microseconds, the precision it is stored at.
    pub fn new(
        sender: Username,
        recipient: Username,
        content: String,
        sent_at: DateTime<Utc>,
    ) -> Self {
        let sent_at = sent_at.trunc_subsecs(6);
        let id = message_id(&sent_at, &content, &sender, &recipient);
        Self {
            id,
            sent_at,
            content,
            sender,
            recipient,
            read: false,
        }
    }
}

/// Canonical text form of a message timestamp, used for hashing and storage.
/// Fixed width so lexical order matches chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Hex SHA-256 over (sent_at, content, sender, recipient), NUL separated.
pub fn message_id(
    sent_at: &DateTime<Utc>,
    content: &str,
    sender: &Username,
    recipient: &Username,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format_timestamp(sent_at).as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    hasher.update([0u8]);
    hasher.update(sender.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(recipient.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// Conversation summary from the recipient's point of view.
/// `read` is true only once every message from `sender` has been read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub time: DateTime<Utc>,
    pub sender: Username,
    pub read: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn message_id_is_deterministic() {
        let a = Message::new("bob".into(), "alice".into(), "hi".into(), at(1_700_000_000));
        let b = Message::new("bob".into(), "alice".into(), "hi".into(), at(1_700_000_000));
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 64);
        assert!(!a.read);
    }

    #[test]
    fn message_id_depends_on_every_field() {
        let base = message_id(&at(10), "hi", &"bob".into(), &"alice".into());
        assert_ne!(base, message_id(&at(11), "hi", &"bob".into(), &"alice".into()));
        assert_ne!(base, message_id(&at(10), "hey", &"bob".into(), &"alice".into()));
        assert_ne!(base, message_id(&at(10), "hi", &"carol".into(), &"alice".into()));
        assert_ne!(base, message_id(&at(10), "hi", &"bob".into(), &"carol".into()));
        // field boundaries matter
        assert_ne!(
            message_id(&at(10), "ab", &"c".into(), &"d".into()),
            message_id(&at(10), "a", &"bc".into(), &"d".into())
        );
    }

    #[test]
    fn username_is_case_sensitive() {
        assert_ne!(Username::from("Alice"), Username::from("alice"));
    }

    #[test]
    fn user_password_is_not_serialized() {
        let user = User {
            username: "alice".into(),
            password: "$argon2id$secret".into(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json, serde_json::json!({ "username": "alice" }));
    }

    #[test]
    fn timestamps_are_fixed_width() {
        let a = format_timestamp(&at(5));
        let b = format_timestamp(&Utc.timestamp_opt(5, 123_000).unwrap());
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }
}

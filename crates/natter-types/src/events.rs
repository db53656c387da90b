use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Username;

/// Commands sent FROM client TO server over the socket.
///
/// Wire shape: `{"kind": "SendMessage", "body": {...}}`. Decoded in two
/// phases by [`SocketRequest::decode`] so an unknown `kind` is reported
/// separately from a malformed frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "body")]
pub enum SocketRequest {
    /// Send a direct message; the sender is the socket's owner.
    SendMessage { content: String, recipient: Username },

    /// Mark every message from `sender` to the socket's owner as read.
    ReadThread { sender: Username },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unknown request kind {0:?}")]
    UnknownKind(String),

    #[error("invalid body for {kind}: {source}")]
    InvalidBody {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// Fatal errors end the connection; an unknown kind only drops the frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnknownKind(_))
    }
}

#[derive(Deserialize)]
struct Envelope {
    kind: String,
    // Absent body decodes as null; only known kinds look at it.
    #[serde(default)]
    body: serde_json::Value,
}

#[derive(Deserialize)]
struct SendMessageBody {
    content: String,
    recipient: Username,
}

#[derive(Deserialize)]
struct ReadThreadBody {
    sender: Username,
}

impl SocketRequest {
    pub const SEND_MESSAGE: &'static str = "SendMessage";
    pub const READ_THREAD: &'static str = "ReadThread";

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => Self::SEND_MESSAGE,
            Self::ReadThread { .. } => Self::READ_THREAD,
        }
    }

    /// Read the tag first, then parse `body` into the shape for that tag.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;

        match envelope.kind.as_str() {
            Self::SEND_MESSAGE => {
                let body: SendMessageBody = serde_json::from_value(envelope.body)
                    .map_err(|source| ProtocolError::InvalidBody {
                        kind: Self::SEND_MESSAGE,
                        source,
                    })?;
                Ok(Self::SendMessage {
                    content: body.content,
                    recipient: body.recipient,
                })
            }
            Self::READ_THREAD => {
                let body: ReadThreadBody = serde_json::from_value(envelope.body)
                    .map_err(|source| ProtocolError::InvalidBody {
                        kind: Self::READ_THREAD,
                        source,
                    })?;
                Ok(Self::ReadThread {
                    sender: body.sender,
                })
            }
            _ => Err(ProtocolError::UnknownKind(envelope.kind)),
        }
    }
}

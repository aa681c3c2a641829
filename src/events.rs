//! Typed wire events for the bidirectional event stream.
//!
//! One JSON object per WebSocket text frame, `{"event": ..., "data": ...}`.
//! Event names keep the legacy client vocabulary ("join chat",
//! "message received") so existing clients keep working. Malformed frames
//! are rejected as BadRequest instead of propagating untyped payloads.

use crate::error::ErrorBody;
use crate::models::{ChatId, Message, MessageId, UserId};
use serde::{Deserialize, Serialize};

/// Events received from clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Associates the connection with a user identity. Credential
    /// verification happens at the external auth boundary before the
    /// socket is opened.
    #[serde(rename = "setup")]
    Setup { user_id: UserId },

    /// Join a chat's room (start viewing it live).
    #[serde(rename = "join chat")]
    JoinChat { chat_id: ChatId },

    /// Leave a chat's room.
    #[serde(rename = "leave chat")]
    LeaveChat { chat_id: ChatId },

    /// Keystroke-equivalent typing signal.
    #[serde(rename = "typing")]
    Typing { chat_id: ChatId },

    /// Explicit end of typing (message submitted or input cleared).
    #[serde(rename = "stop typing")]
    StopTyping { chat_id: ChatId },

    /// Ask the server to fan a persisted message out to the room. The
    /// server re-reads the message by id rather than trusting a
    /// client-supplied entity.
    #[serde(rename = "new message")]
    NewMessage { message_id: MessageId },
}

/// Events sent to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Reply to `setup`.
    #[serde(rename = "connected")]
    Connected,

    /// Another member started typing in the chat.
    #[serde(rename = "typing")]
    Typing { chat_id: ChatId, user_id: UserId },

    /// A member stopped typing.
    #[serde(rename = "stop typing")]
    StopTyping { chat_id: ChatId, user_id: UserId },

    /// Live delivery of a message to a joined connection.
    #[serde(rename = "message received")]
    MessageReceived { message: Message },

    /// Notification-fallback drain, sent after `connected`.
    #[serde(rename = "pending notifications")]
    PendingNotifications {
        notifications: Vec<PendingNotification>,
    },

    /// A rejected client event.
    #[serde(rename = "error")]
    Error { status: u16, body: ErrorBody },
}

/// A pending-delivery marker for an absent member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingNotification {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub queued_at: i64,
}

impl ClientEvent {
    /// Parse a text frame into a typed event.
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

impl ServerEvent {
    /// Encode for the wire. Serialization of these types cannot fail.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // Unreachable for these types; keep the connection alive anyway.
            r#"{"event":"error","data":{"status":500,"body":{"message":"encoding failure"}}}"#
                .to_string()
        })
    }
}

//! Message repository.
//!
//! Messages are immutable once created; the only delete path is the chat
//! cascade in `ChatRepository::delete`. Creation order is the autoincrement
//! id, which the dispatcher relies on for per-chat delivery order.

use super::DbError;
use crate::models::{ChatId, MediaDescriptor, Message, MessageId, UserId, UserProfile};
use sqlx::SqlitePool;

type MessageTuple = (
    i64,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<i64>,
    i64,
    i64,
    String,
    Option<String>,
    String,
);

const MESSAGE_SELECT: &str = r#"
    SELECT m.id, m.chat_id, m.content,
           m.media_url, m.media_type, m.media_filename, m.media_size,
           m.created_at,
           u.id, u.name, u.avatar_url, u.email
    FROM messages m JOIN users u ON u.id = m.sender_id
"#;

fn message_from_tuple(t: MessageTuple) -> Message {
    let (
        id,
        chat_id,
        content,
        media_url,
        media_type,
        media_filename,
        media_size,
        created_at,
        sender_id,
        sender_name,
        sender_avatar,
        sender_email,
    ) = t;

    let media = match (media_url, media_type) {
        (Some(url), Some(media_type)) => Some(MediaDescriptor {
            url,
            media_type,
            filename: media_filename,
            size: media_size,
        }),
        _ => None,
    };

    Message {
        id,
        chat_id,
        sender: UserProfile {
            id: sender_id,
            name: sender_name,
            avatar_url: sender_avatar,
            email: sender_email,
        },
        content,
        media,
        created_at,
    }
}

/// Repository for message operations.
pub struct MessageRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MessageRepository<'a> {
    /// Create a new message repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a message and return its id.
    pub async fn create(
        &self,
        chat: ChatId,
        sender: UserId,
        content: Option<&str>,
        media: Option<&MediaDescriptor>,
    ) -> Result<MessageId, DbError> {
        let now = chrono::Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO messages
                (chat_id, sender_id, content, media_url, media_type, media_filename, media_size, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(chat)
        .bind(sender)
        .bind(content)
        .bind(media.map(|m| m.url.as_str()))
        .bind(media.map(|m| m.media_type.as_str()))
        .bind(media.and_then(|m| m.filename.as_deref()))
        .bind(media.and_then(|m| m.size))
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Fetch a message with its sender profile populated.
    pub async fn find_populated(&self, id: MessageId) -> Result<Option<Message>, DbError> {
        let row = sqlx::query_as::<_, MessageTuple>(&format!("{MESSAGE_SELECT} WHERE m.id = ?"))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(message_from_tuple))
    }

    /// Full history for a chat in creation order.
    pub async fn list_for_chat(&self, chat: ChatId) -> Result<Vec<Message>, DbError> {
        let rows = sqlx::query_as::<_, MessageTuple>(&format!(
            "{MESSAGE_SELECT} WHERE m.chat_id = ? ORDER BY m.id"
        ))
        .bind(chat)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(message_from_tuple).collect())
    }

    /// Number of messages referencing a chat.
    pub async fn count_for_chat(&self, chat: ChatId) -> Result<i64, DbError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM messages WHERE chat_id = ?")
                .bind(chat)
                .fetch_one(self.pool)
                .await?;

        Ok(count)
    }
}

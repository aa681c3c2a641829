//! Chat repository.
//!
//! Membership is stored as a set (PRIMARY KEY (chat_id, user_id)), so the
//! mutation queries below are idempotent under concurrent writers: two
//! racing joins for the same user collapse into one row, and find-or-create
//! for 1:1 chats converges on the UNIQUE direct_key.

use super::DbError;
use crate::models::{ChatId, MessageId, UserId, UserProfile};
use sqlx::SqlitePool;

/// A chat row as stored, including the password hash. Only the gate sees
/// this type; responses use the populated `models::Chat`.
#[derive(Debug, Clone)]
pub struct ChatRow {
    pub id: ChatId,
    pub chat_name: String,
    pub is_group_chat: bool,
    pub is_public: bool,
    pub is_protected: bool,
    pub password_hash: Option<String>,
    pub group_admin_id: Option<UserId>,
    pub latest_message_id: Option<MessageId>,
    pub created_at: i64,
    pub updated_at: i64,
}

type ChatTuple = (
    i64,
    String,
    bool,
    bool,
    bool,
    Option<String>,
    Option<i64>,
    Option<i64>,
    i64,
    i64,
);

const CHAT_COLUMNS: &str = "id, chat_name, is_group_chat, is_public, is_protected, \
     password_hash, group_admin_id, latest_message_id, created_at, updated_at";

fn row_from_tuple(t: ChatTuple) -> ChatRow {
    let (
        id,
        chat_name,
        is_group_chat,
        is_public,
        is_protected,
        password_hash,
        group_admin_id,
        latest_message_id,
        created_at,
        updated_at,
    ) = t;
    ChatRow {
        id,
        chat_name,
        is_group_chat,
        is_public,
        is_protected,
        password_hash,
        group_admin_id,
        latest_message_id,
        created_at,
        updated_at,
    }
}

/// The "loId:hiId" key that makes 1:1 chats unique per unordered pair.
fn direct_key(a: UserId, b: UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

/// Repository for chat operations.
pub struct ChatRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ChatRepository<'a> {
    /// Create a new chat repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch a chat row by id.
    pub async fn find_row(&self, id: ChatId) -> Result<Option<ChatRow>, DbError> {
        let row = sqlx::query_as::<_, ChatTuple>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(row_from_tuple))
    }

    /// Fetch the 1:1 chat between two users, membership matched
    /// symmetrically.
    pub async fn find_direct_between(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<ChatRow>, DbError> {
        let row = sqlx::query_as::<_, ChatTuple>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats WHERE direct_key = ?"
        ))
        .bind(direct_key(a, b))
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(row_from_tuple))
    }

    /// Find-or-create the 1:1 chat between two users.
    ///
    /// INSERT OR IGNORE on the unique direct_key means a concurrent caller
    /// may win the insert; both callers then read back the same row.
    pub async fn create_direct(&self, a: UserId, b: UserId) -> Result<ChatRow, DbError> {
        let now = chrono::Utc::now().timestamp_millis();
        let key = direct_key(a, b);

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO chats
                (chat_name, is_group_chat, is_public, is_protected, direct_key, created_at, updated_at)
            VALUES (?, 0, 0, 0, ?, ?, ?)
            "#,
        )
        .bind("direct")
        .bind(&key)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await?;

        let row = self
            .find_direct_between(a, b)
            .await?
            .ok_or_else(|| DbError::Internal(format!("direct chat {key} vanished after insert")))?;

        self.add_member(row.id, a).await?;
        self.add_member(row.id, b).await?;

        Ok(row)
    }

    /// Create a group chat with its initial member list (insertion order
    /// preserved) and admin.
    pub async fn create_group(
        &self,
        name: &str,
        member_ids: &[UserId],
        admin: UserId,
        password_hash: Option<&str>,
        is_public: bool,
    ) -> Result<ChatRow, DbError> {
        let now = chrono::Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO chats
                (chat_name, is_group_chat, is_public, is_protected, password_hash,
                 group_admin_id, created_at, updated_at)
            VALUES (?, 1, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(is_public)
        .bind(!is_public)
        .bind(password_hash)
        .bind(admin)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await?;

        let chat_id = result.last_insert_rowid();

        for user in member_ids {
            self.add_member(chat_id, *user).await?;
        }

        self.find_row(chat_id)
            .await?
            .ok_or_else(|| DbError::Internal(format!("group chat {chat_id} vanished after insert")))
    }

    /// Add a member. Set-union semantics: adding an existing member is a
    /// no-op, never a duplicate row.
    pub async fn add_member(&self, chat: ChatId, user: UserId) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO chat_members (chat_id, user_id, ord)
            SELECT ?, ?, COALESCE(MAX(ord) + 1, 0) FROM chat_members WHERE chat_id = ?
            "#,
        )
        .bind(chat)
        .bind(user)
        .bind(chat)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Remove a member. Returns whether a row was removed.
    pub async fn remove_member(&self, chat: ChatId, user: UserId) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM chat_members WHERE chat_id = ? AND user_id = ?")
            .bind(chat)
            .bind(user)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Whether a user is currently a member of a chat.
    pub async fn is_member(&self, chat: ChatId, user: UserId) -> Result<bool, DbError> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT 1 FROM chat_members WHERE chat_id = ? AND user_id = ?",
        )
        .bind(chat)
        .bind(user)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Member ids in insertion order.
    pub async fn member_ids(&self, chat: ChatId) -> Result<Vec<UserId>, DbError> {
        let rows = sqlx::query_as::<_, (i64,)>(
            "SELECT user_id FROM chat_members WHERE chat_id = ? ORDER BY ord, user_id",
        )
        .bind(chat)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Member profiles in insertion order (restricted projection).
    pub async fn member_profiles(&self, chat: ChatId) -> Result<Vec<UserProfile>, DbError> {
        let rows = sqlx::query_as::<_, (i64, String, Option<String>, String)>(
            r#"
            SELECT u.id, u.name, u.avatar_url, u.email
            FROM chat_members m JOIN users u ON u.id = m.user_id
            WHERE m.chat_id = ?
            ORDER BY m.ord, m.user_id
            "#,
        )
        .bind(chat)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, avatar_url, email)| UserProfile {
                id,
                name,
                avatar_url,
                email,
            })
            .collect())
    }

    /// Persist a new chat name. Returns whether the chat existed.
    pub async fn update_name(&self, chat: ChatId, name: &str) -> Result<bool, DbError> {
        let now = chrono::Utc::now().timestamp_millis();
        let result = sqlx::query("UPDATE chats SET chat_name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(now)
            .bind(chat)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record the latest message and bump the chat's update time.
    pub async fn set_latest_message(
        &self,
        chat: ChatId,
        message: MessageId,
    ) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query("UPDATE chats SET latest_message_id = ?, updated_at = ? WHERE id = ?")
            .bind(message)
            .bind(now)
            .bind(chat)
            .execute(self.pool)
            .await?;

        Ok(())
    }

    /// Delete a chat and everything referencing it: messages first, then
    /// membership, then the chat row, in one transaction.
    pub async fn delete(&self, chat: ChatId) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE chat_id = ?")
            .bind(chat)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM chat_members WHERE chat_id = ?")
            .bind(chat)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM chats WHERE id = ?")
            .bind(chat)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    /// All chats a user belongs to, most recently updated first.
    pub async fn list_rows_for_user(&self, user: UserId) -> Result<Vec<ChatRow>, DbError> {
        let rows = sqlx::query_as::<_, ChatTuple>(&format!(
            r#"
            SELECT {CHAT_COLUMNS} FROM chats
            WHERE id IN (SELECT chat_id FROM chat_members WHERE user_id = ?)
            ORDER BY updated_at DESC, id DESC
            "#
        ))
        .bind(user)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(row_from_tuple).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_key_is_symmetric() {
        assert_eq!(direct_key(3, 11), direct_key(11, 3));
        assert_eq!(direct_key(3, 11), "3:11");
        assert_eq!(direct_key(5, 5), "5:5");
    }
}

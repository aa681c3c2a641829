//! User repository.
//!
//! Identities are minted by the external auth service; this repository only
//! stores the directory row and serves the restricted profile projection
//! (name/avatar/email).

use super::DbError;
use crate::models::{UserId, UserProfile};
use sqlx::SqlitePool;

/// Repository for user directory operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    /// Create a new user repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a directory entry for an externally authenticated identity.
    pub async fn create(
        &self,
        name: &str,
        email: &str,
        avatar_url: Option<&str>,
    ) -> Result<UserProfile, DbError> {
        let now = chrono::Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO users (name, avatar_url, email, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(avatar_url)
        .bind(email)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(UserProfile {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            avatar_url: avatar_url.map(String::from),
            email: email.to_string(),
        })
    }

    /// Fetch one profile.
    pub async fn find_profile(&self, id: UserId) -> Result<Option<UserProfile>, DbError> {
        let row = sqlx::query_as::<_, (i64, String, Option<String>, String)>(
            "SELECT id, name, avatar_url, email FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(|(id, name, avatar_url, email)| UserProfile {
            id,
            name,
            avatar_url,
            email,
        }))
    }

    /// Whether a user id exists.
    pub async fn exists(&self, id: UserId) -> Result<bool, DbError> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT 1 FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.is_some())
    }
}

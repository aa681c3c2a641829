//! Core entities as they appear on the wire and in lifecycle responses.
//!
//! Referenced users are always the restricted profile projection
//! (name/avatar/email); password material never reaches these types, it
//! stays inside `crate::db`.

use serde::{Deserialize, Serialize};

/// Persistent user identity.
pub type UserId = i64;
/// Persistent chat identity.
pub type ChatId = i64;
/// Persistent message identity.
pub type MessageId = i64;

/// Public projection of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub avatar_url: Option<String>,
    pub email: String,
}

/// Media attached to a message. Upload storage is external; only the
/// descriptor rides along.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub url: String,
    pub media_type: String,
    pub filename: Option<String>,
    pub size: Option<i64>,
}

/// A chat message. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender: UserProfile,
    pub content: Option<String>,
    pub media: Option<MediaDescriptor>,
    pub created_at: i64,
}

/// A chat, populated for responses.
///
/// Invariants: a non-group chat has exactly 2 members, no admin, never
/// protected. A group chat has one admin who is a member; `is_public` and
/// `is_protected` are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub chat_name: String,
    pub is_group_chat: bool,
    pub is_public: bool,
    pub is_protected: bool,
    /// Members in insertion order.
    pub users: Vec<UserProfile>,
    pub group_admin: Option<UserProfile>,
    pub latest_message: Option<Message>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Chat {
    /// Whether `user` is currently a member.
    pub fn has_member(&self, user: UserId) -> bool {
        self.users.iter().any(|u| u.id == user)
    }

    /// Member ids in insertion order.
    pub fn member_ids(&self) -> Vec<UserId> {
        self.users.iter().map(|u| u.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: UserId) -> UserProfile {
        UserProfile {
            id,
            name: format!("user{id}"),
            avatar_url: None,
            email: format!("user{id}@example.com"),
        }
    }

    #[test]
    fn test_has_member() {
        let chat = Chat {
            id: 1,
            chat_name: "direct".into(),
            is_group_chat: false,
            is_public: false,
            is_protected: false,
            users: vec![profile(1), profile(2)],
            group_admin: None,
            latest_message: None,
            created_at: 0,
            updated_at: 0,
        };
        assert!(chat.has_member(1));
        assert!(!chat.has_member(3));
        assert_eq!(chat.member_ids(), vec![1, 2]);
    }

    #[test]
    fn test_chat_serialization_has_no_password_field() {
        let chat = Chat {
            id: 7,
            chat_name: "room".into(),
            is_group_chat: true,
            is_public: true,
            is_protected: false,
            users: vec![profile(1)],
            group_admin: Some(profile(1)),
            latest_message: None,
            created_at: 0,
            updated_at: 0,
        };
        let json = serde_json::to_string(&chat).expect("serialize");
        assert!(!json.contains("password"));
        assert!(json.contains("\"is_public\":true"));
    }
}

//! Access control gate and chat lifecycle.
//!
//! Every chat/group mutation funnels through [`ChatGate`]: creation (1:1,
//! public group, protected group), membership mutation, rename, deletion
//! with cascading message removal, and message sending. Operations fail
//! fast with a typed [`ApiError`]; the boundary layer maps it to a status.
//!
//! Membership mutations are set operations in the store (union/difference),
//! so concurrent calls for the same user converge instead of duplicating
//! or losing entries.

use crate::db::{ChatRow, Database};
use crate::dispatch::MessageDispatcher;
use crate::error::{ApiError, ApiResult};
use crate::models::{Chat, ChatId, MediaDescriptor, Message, MessageId, UserId};
use crate::security::password;
use std::sync::Arc;
use tracing::info;

/// The gate: authorization plus lifecycle for chats and messages.
pub struct ChatGate {
    db: Database,
    dispatcher: Arc<MessageDispatcher>,
}

impl ChatGate {
    /// Create a gate over the store, dispatching through `dispatcher`.
    pub fn new(db: Database, dispatcher: Arc<MessageDispatcher>) -> Self {
        Self { db, dispatcher }
    }

    /// The underlying store handle.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// The dispatcher used for fan-out.
    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }

    // ------------------------------------------------------------------
    // 1:1 chats
    // ------------------------------------------------------------------

    /// Return the existing 1:1 chat between two users (membership matched
    /// symmetrically) or create it. Idempotent: repeated and concurrent
    /// calls for the same pair converge on one chat.
    pub async fn access_chat(&self, me: UserId, other: UserId) -> ApiResult<Chat> {
        if me == other {
            return Err(ApiError::BadRequest(
                "cannot open a direct chat with yourself".into(),
            ));
        }
        if !self.db.users().exists(other).await? {
            return Err(ApiError::NotFound(format!("user {other} not found")));
        }

        let row = match self.db.chats().find_direct_between(me, other).await? {
            Some(row) => row,
            None => {
                let row = self.db.chats().create_direct(me, other).await?;
                info!(chat = row.id, a = me, b = other, "Direct chat created");
                row
            }
        };

        self.populate(row).await
    }

    /// All chats the user belongs to, most recently updated first.
    pub async fn fetch_chats(&self, user: UserId) -> ApiResult<Vec<Chat>> {
        let rows = self.db.chats().list_rows_for_user(user).await?;
        let mut chats = Vec::with_capacity(rows.len());
        for row in rows {
            chats.push(self.populate(row).await?);
        }
        Ok(chats)
    }

    // ------------------------------------------------------------------
    // Group chats
    // ------------------------------------------------------------------

    /// Create a group chat. The creator is auto-added as a member and set
    /// as admin. No password means a public group; a password means a
    /// protected one.
    pub async fn create_group(
        &self,
        name: &str,
        invited: &[UserId],
        creator: UserId,
        group_password: Option<&str>,
    ) -> ApiResult<Chat> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::BadRequest("group name is required".into()));
        }

        // Set semantics on the invite list: duplicates and the creator
        // collapse before the size check.
        let mut members: Vec<UserId> = Vec::new();
        for &id in invited {
            if id != creator && !members.contains(&id) {
                members.push(id);
            }
        }
        if members.len() < 2 {
            return Err(ApiError::BadRequest(
                "more than 2 users are required to form a group chat".into(),
            ));
        }
        members.push(creator);

        for &id in &members {
            if !self.db.users().exists(id).await? {
                return Err(ApiError::NotFound(format!("user {id} not found")));
            }
        }

        let group_password = group_password.map(str::trim).filter(|p| !p.is_empty());
        let (is_public, password_hash) = match group_password {
            None => (true, None),
            Some(plain) => {
                let hash = password::hash_password(plain)
                    .map_err(|e| ApiError::BadRequest(format!("unusable password: {e}")))?;
                (false, Some(hash))
            }
        };

        let row = self
            .db
            .chats()
            .create_group(name, &members, creator, password_hash.as_deref(), is_public)
            .await?;

        info!(
            chat = row.id,
            name = %name,
            members = members.len(),
            public = is_public,
            "Group chat created"
        );

        self.populate(row).await
    }

    /// Join a password-protected group chat.
    ///
    /// Membership add is set-union: a user who is already a member (or two
    /// racing joins for the same user) ends up in the chat exactly once.
    pub async fn join_protected(
        &self,
        chat: ChatId,
        join_password: &str,
        user: UserId,
    ) -> ApiResult<Chat> {
        let row = self.require_chat(chat).await?;

        if !row.is_group_chat || row.is_public || !row.is_protected {
            return Err(ApiError::BadRequest(
                "not a password-protected group chat".into(),
            ));
        }
        if !self.db.users().exists(user).await? {
            return Err(ApiError::NotFound(format!("user {user} not found")));
        }

        self.check_room_password(&row, join_password)?;

        self.db.chats().add_member(chat, user).await?;
        info!(chat = chat, user = user, "Joined protected chat");

        let row = self.require_chat(chat).await?;
        self.populate(row).await
    }

    /// Persist a new chat name. No role check at this layer.
    pub async fn rename(&self, chat: ChatId, name: &str) -> ApiResult<Chat> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::BadRequest("chat name is required".into()));
        }

        if !self.db.chats().update_name(chat, name).await? {
            return Err(ApiError::NotFound("chat not found".into()));
        }

        let row = self.require_chat(chat).await?;
        self.populate(row).await
    }

    /// Add a member to a group chat. Admin-only.
    pub async fn add_member(
        &self,
        chat: ChatId,
        acting: UserId,
        target: UserId,
    ) -> ApiResult<Chat> {
        let row = self.require_chat(chat).await?;
        let admin = self.require_group_admin(&row)?;

        if acting != admin {
            return Err(ApiError::Forbidden(
                "only the group admin can add members".into(),
            ));
        }
        if !self.db.users().exists(target).await? {
            return Err(ApiError::NotFound(format!("user {target} not found")));
        }

        self.db.chats().add_member(chat, target).await?;
        info!(chat = chat, user = target, by = acting, "Member added");

        let row = self.require_chat(chat).await?;
        self.populate(row).await
    }

    /// Remove a member from a group chat. Admin-only, except self-removal
    /// (leaving). The admin can never be removed: the group must keep its
    /// one admin for as long as it exists.
    pub async fn remove_member(
        &self,
        chat: ChatId,
        acting: UserId,
        target: UserId,
    ) -> ApiResult<Chat> {
        let row = self.require_chat(chat).await?;
        let admin = self.require_group_admin(&row)?;

        if acting != admin && acting != target {
            return Err(ApiError::Forbidden(
                "only the group admin can remove other members".into(),
            ));
        }
        if target == admin {
            return Err(ApiError::Forbidden("the group admin cannot leave the chat".into()));
        }

        self.db.chats().remove_member(chat, target).await?;
        info!(chat = chat, user = target, by = acting, "Member removed");

        let row = self.require_chat(chat).await?;
        self.populate(row).await
    }

    /// Delete a chat and all its messages.
    ///
    /// Group chats: members only, public groups are permanently
    /// non-deletable, admin-only, and protected groups additionally demand
    /// the room password. 1:1 chats: any participant, no password.
    pub async fn delete_chat(
        &self,
        chat: ChatId,
        acting: UserId,
        delete_password: Option<&str>,
    ) -> ApiResult<ChatId> {
        let row = self.require_chat(chat).await?;

        if !self.db.chats().is_member(chat, acting).await? {
            return Err(ApiError::Forbidden(
                "you are not a member of this chat".into(),
            ));
        }

        if row.is_group_chat {
            if row.is_public {
                return Err(ApiError::Forbidden("public chats cannot be deleted".into()));
            }
            if row.group_admin_id != Some(acting) {
                return Err(ApiError::Forbidden(
                    "only the group admin can delete this chat".into(),
                ));
            }
            if row.is_protected {
                let supplied = delete_password.ok_or_else(|| {
                    ApiError::BadRequest("room password is required to delete this chat".into())
                })?;
                self.check_room_password(&row, supplied)?;
            }
        }

        self.db.chats().delete(chat).await?;
        info!(chat = chat, by = acting, "Chat deleted with its messages");
        Ok(chat)
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Persist a message and fan it out (live delivery for present
    /// members, notification fallback for absent ones).
    ///
    /// The per-chat sequence lock is held from before the insert until the
    /// fan-out completes, so per-chat delivery order equals creation order.
    pub async fn send_message(
        &self,
        sender: UserId,
        chat: ChatId,
        content: Option<&str>,
        media: Option<MediaDescriptor>,
    ) -> ApiResult<Message> {
        let content = content.map(str::trim).filter(|c| !c.is_empty());
        if content.is_none() && media.is_none() {
            return Err(ApiError::BadRequest(
                "message content or media is required".into(),
            ));
        }

        self.require_chat(chat).await?;
        if !self.db.chats().is_member(chat, sender).await? {
            return Err(ApiError::Forbidden(
                "you are not a member of this chat".into(),
            ));
        }

        let _order = self.dispatcher.sequence(chat).await;

        let id = self
            .db
            .messages()
            .create(chat, sender, content, media.as_ref())
            .await?;
        self.db.chats().set_latest_message(chat, id).await?;

        let message = self
            .db
            .messages()
            .find_populated(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("message vanished after insert".into()))?;

        let members = self.db.chats().member_ids(chat).await?;
        self.dispatcher.dispatch(&message, &members);

        Ok(message)
    }

    /// Re-dispatch an already persisted message (the `new message` wire
    /// event). The requester must be a member of the message's chat; the
    /// entity is re-read from the store, never trusted from the wire.
    pub async fn dispatch_existing(
        &self,
        message: MessageId,
        requested_by: UserId,
    ) -> ApiResult<Message> {
        let message = self
            .db
            .messages()
            .find_populated(message)
            .await?
            .ok_or_else(|| ApiError::NotFound("message not found".into()))?;

        if !self.db.chats().is_member(message.chat_id, requested_by).await? {
            return Err(ApiError::Forbidden(
                "you are not a member of this chat".into(),
            ));
        }

        let _order = self.dispatcher.sequence(message.chat_id).await;
        let members = self.db.chats().member_ids(message.chat_id).await?;
        self.dispatcher.dispatch(&message, &members);

        Ok(message)
    }

    /// Full message history for a chat, creation order.
    pub async fn messages_for_chat(&self, chat: ChatId) -> ApiResult<Vec<Message>> {
        self.require_chat(chat).await?;
        Ok(self.db.messages().list_for_chat(chat).await?)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn require_chat(&self, chat: ChatId) -> ApiResult<ChatRow> {
        self.db
            .chats()
            .find_row(chat)
            .await?
            .ok_or_else(|| ApiError::NotFound("chat not found".into()))
    }

    fn require_group_admin(&self, row: &ChatRow) -> ApiResult<UserId> {
        if !row.is_group_chat {
            return Err(ApiError::BadRequest("not a group chat".into()));
        }
        row.group_admin_id
            .ok_or_else(|| ApiError::BadRequest("group chat has no admin".into()))
    }

    /// Constant-time room password check. A protected row without a hash
    /// is treated as a mismatch after burning equivalent verification
    /// time, so a corrupt row is indistinguishable from a wrong password.
    fn check_room_password(&self, row: &ChatRow, supplied: &str) -> ApiResult<()> {
        let ok = match row.password_hash.as_deref() {
            Some(hash) => password::verify_password(supplied, hash),
            None => {
                password::dummy_verify(supplied);
                false
            }
        };
        if ok {
            Ok(())
        } else {
            Err(ApiError::Unauthorized("incorrect room password".into()))
        }
    }

    /// Assemble the populated response entity: members in insertion order,
    /// admin and latest message attached, profile fields only.
    async fn populate(&self, row: ChatRow) -> ApiResult<Chat> {
        let users = self.db.chats().member_profiles(row.id).await?;

        let group_admin = match row.group_admin_id {
            Some(id) => self.db.users().find_profile(id).await?,
            None => None,
        };

        let latest_message = match row.latest_message_id {
            Some(id) => self.db.messages().find_populated(id).await?,
            None => None,
        };

        Ok(Chat {
            id: row.id,
            chat_name: row.chat_name,
            is_group_chat: row.is_group_chat,
            is_public: row.is_public,
            is_protected: row.is_protected,
            users,
            group_admin,
            latest_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

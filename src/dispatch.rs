//! Message dispatcher.
//!
//! Fans a persisted message out to live room members; absent members get a
//! pending notification instead. Live delivery is best-effort with no
//! retry: the notification fallback is the durability guarantee for
//! members who were not watching.

use crate::events::{PendingNotification, ServerEvent};
use crate::models::{ChatId, Message, UserId};
use crate::state::SessionRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Pending-delivery markers per recipient, keyed by message id.
///
/// Enqueueing the same message twice for one recipient is a no-op; distinct
/// messages accumulate until the client consumes them on its next state
/// refresh.
#[derive(Default)]
pub struct NotificationQueue {
    pending: DashMap<UserId, Vec<PendingNotification>>,
}

impl NotificationQueue {
    /// Idempotently queue a notification. Returns false when the message
    /// was already pending for this recipient.
    pub fn enqueue(&self, user: UserId, chat: ChatId, message: crate::models::MessageId) -> bool {
        let mut queue = self.pending.entry(user).or_default();
        if queue.iter().any(|n| n.message_id == message) {
            return false;
        }
        queue.push(PendingNotification {
            message_id: message,
            chat_id: chat,
            queued_at: chrono::Utc::now().timestamp_millis(),
        });
        true
    }

    /// Drain everything pending for a user (client state refresh).
    pub fn take(&self, user: UserId) -> Vec<PendingNotification> {
        self.pending
            .remove(&user)
            .map(|(_, queue)| queue)
            .unwrap_or_default()
    }

    /// How many notifications are pending for a user.
    pub fn pending_count(&self, user: UserId) -> usize {
        self.pending.get(&user).map(|q| q.len()).unwrap_or(0)
    }
}

/// Fans persisted messages out to rooms.
pub struct MessageDispatcher {
    registry: Arc<SessionRegistry>,
    notifications: NotificationQueue,
    /// Per-chat sequence locks: held across persist -> fan-out so per-chat
    /// delivery order matches creation order. No cross-chat ordering.
    sequencers: DashMap<ChatId, Arc<Mutex<()>>>,
}

impl MessageDispatcher {
    /// Create a dispatcher delivering through `registry`.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            notifications: NotificationQueue::default(),
            sequencers: DashMap::new(),
        }
    }

    /// The notification fallback queue.
    pub fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    /// Acquire the per-chat sequence lock. The caller holds the guard from
    /// before the message is persisted until `dispatch` returns.
    pub async fn sequence(&self, chat: ChatId) -> OwnedMutexGuard<()> {
        let lock = self
            .sequencers
            .entry(chat)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Fan one persisted message out to `members`.
    ///
    /// Present members (other than the sender) receive `message received`
    /// on every connection they have joined to the room; absent members get
    /// an idempotent pending notification. A failed live delivery is
    /// dropped and logged, never retried, and never blocks the rest.
    pub fn dispatch(&self, message: &Message, members: &[UserId]) {
        let chat = message.chat_id;
        let event = ServerEvent::MessageReceived {
            message: message.clone(),
        };

        for &member in members {
            if member == message.sender.id {
                continue;
            }

            if self.registry.is_present(chat, member) {
                let delivered = self.registry.deliver_to_member(chat, member, &event);
                debug!(
                    chat = chat,
                    message = message.id,
                    member = member,
                    connections = delivered,
                    "Live delivery"
                );
            } else if self.notifications.enqueue(member, chat, message.id) {
                debug!(
                    chat = chat,
                    message = message.id,
                    member = member,
                    "Queued notification for absent member"
                );
            }
        }
    }
}

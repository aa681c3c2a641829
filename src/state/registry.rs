//! Session registry and room membership tracker.
//!
//! Tracks live connections per user (multi-device: one user may hold
//! several connections) and, per chat, the set of connections currently
//! "joined" (actively viewing) that chat. All lookups by unknown
//! connection/user/chat are no-ops, never fatal.
//!
//! Fan-out routes through one bounded mpsc sender per connection. Guards
//! from the concurrent maps are never held across sends: senders are
//! cloned out first, so one slow or dead connection cannot block the rest.

use crate::events::ServerEvent;
use crate::models::{ChatId, UserId};
use dashmap::DashMap;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Unique identifier for one live connection.
pub type ConnId = Uuid;

/// Outgoing-event queue depth per connection. A client that cannot drain
/// this many events loses best-effort deliveries rather than stalling the
/// server.
pub const OUTGOING_QUEUE_DEPTH: usize = 256;

struct ConnectionEntry {
    user_id: UserId,
    sender: mpsc::Sender<ServerEvent>,
    /// Rooms this connection has joined, for disconnect cleanup.
    joined: HashSet<ChatId>,
}

/// Central registry of live connections and rooms.
#[derive(Default)]
pub struct SessionRegistry {
    /// All live connections.
    conns: DashMap<ConnId, ConnectionEntry>,
    /// User id -> their live connections.
    user_conns: DashMap<UserId, HashSet<ConnId>>,
    /// Chat id -> connections currently joined to its room.
    rooms: DashMap<ChatId, HashSet<ConnId>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a connection with a user identity.
    pub fn register(&self, user: UserId, conn: ConnId, sender: mpsc::Sender<ServerEvent>) {
        self.conns.insert(
            conn,
            ConnectionEntry {
                user_id: user,
                sender,
                joined: HashSet::new(),
            },
        );
        self.user_conns.entry(user).or_default().insert(conn);
        debug!(%conn, user = user, "Connection registered");
    }

    /// Join a connection to a chat's room. Unknown connections are a no-op.
    pub fn join(&self, chat: ChatId, conn: ConnId) {
        let Some(mut entry) = self.conns.get_mut(&conn) else {
            return;
        };
        entry.joined.insert(chat);
        drop(entry);

        self.rooms.entry(chat).or_default().insert(conn);
        debug!(%conn, chat = chat, "Joined room");
    }

    /// Remove a connection from a chat's room. Unknown ids are a no-op.
    pub fn leave(&self, chat: ChatId, conn: ConnId) {
        if let Some(mut entry) = self.conns.get_mut(&conn) {
            entry.joined.remove(&chat);
        }
        if let Some(mut room) = self.rooms.get_mut(&chat) {
            room.remove(&conn);
            let empty = room.is_empty();
            drop(room);
            if empty {
                self.rooms.remove_if(&chat, |_, v| v.is_empty());
            }
        }
    }

    /// Remove a connection from the registry and from every room it had
    /// joined. Returns the user id and joined rooms so the caller can run
    /// presence cleanup (e.g. clear typing state).
    pub fn disconnect(&self, conn: ConnId) -> Option<(UserId, Vec<ChatId>)> {
        let (_, entry) = self.conns.remove(&conn)?;

        for chat in &entry.joined {
            if let Some(mut room) = self.rooms.get_mut(chat) {
                room.remove(&conn);
                let empty = room.is_empty();
                drop(room);
                if empty {
                    self.rooms.remove_if(chat, |_, v| v.is_empty());
                }
            }
        }

        if let Some(mut conns) = self.user_conns.get_mut(&entry.user_id) {
            conns.remove(&conn);
            let empty = conns.is_empty();
            drop(conns);
            if empty {
                self.user_conns.remove_if(&entry.user_id, |_, v| v.is_empty());
            }
        }

        debug!(%conn, user = entry.user_id, rooms = entry.joined.len(), "Connection disconnected");
        Some((entry.user_id, entry.joined.into_iter().collect()))
    }

    /// A user is "present" in a chat iff at least one of their connections
    /// is joined to it.
    pub fn is_present(&self, chat: ChatId, user: UserId) -> bool {
        let Some(room) = self.rooms.get(&chat) else {
            return false;
        };
        room.iter().any(|conn| {
            self.conns
                .get(conn)
                .is_some_and(|entry| entry.user_id == user)
        })
    }

    /// Deliver an event to every connection joined to `chat`, optionally
    /// excluding one connection. Best-effort: a full or closed queue drops
    /// that delivery and never blocks other members.
    pub fn broadcast(&self, chat: ChatId, event: &ServerEvent, exclude: Option<ConnId>) {
        for (conn, sender) in self.room_senders(chat, |_| true) {
            if exclude == Some(conn) {
                continue;
            }
            if let Err(e) = sender.try_send(event.clone()) {
                debug!(%conn, chat = chat, error = %e, "Dropped broadcast delivery");
            }
        }
    }

    /// Deliver an event to every room connection belonging to anyone but
    /// `user` (used for typing signals, which a user's own devices do not
    /// need to see).
    pub fn broadcast_excluding_user(&self, chat: ChatId, user: UserId, event: &ServerEvent) {
        for (conn, sender) in self.room_senders(chat, |entry| entry.user_id != user) {
            if let Err(e) = sender.try_send(event.clone()) {
                debug!(%conn, chat = chat, error = %e, "Dropped broadcast delivery");
            }
        }
    }

    /// Deliver an event to each of `user`'s connections joined to `chat`.
    /// Returns how many queues accepted it.
    pub fn deliver_to_member(&self, chat: ChatId, user: UserId, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for (conn, sender) in self.room_senders(chat, |entry| entry.user_id == user) {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(%conn, chat = chat, error = %e, "Dropped member delivery"),
            }
        }
        delivered
    }

    /// Number of connections currently joined to a chat's room.
    pub fn room_size(&self, chat: ChatId) -> usize {
        self.rooms.get(&chat).map(|r| r.len()).unwrap_or(0)
    }

    /// Clone the senders for a room's connections matching `filter`,
    /// dropping all map guards before anything is sent.
    fn room_senders(
        &self,
        chat: ChatId,
        filter: impl Fn(&ConnectionEntry) -> bool,
    ) -> Vec<(ConnId, mpsc::Sender<ServerEvent>)> {
        let Some(room) = self.rooms.get(&chat) else {
            return Vec::new();
        };
        let conns: Vec<ConnId> = room.iter().copied().collect();
        drop(room);

        conns
            .into_iter()
            .filter_map(|conn| {
                self.conns
                    .get(&conn)
                    .filter(|entry| filter(entry))
                    .map(|entry| (conn, entry.sender.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(registry: &SessionRegistry, user: UserId) -> (ConnId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(OUTGOING_QUEUE_DEPTH);
        let conn = Uuid::new_v4();
        registry.register(user, conn, tx);
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_presence_requires_a_joined_connection() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = connect(&registry, 1);

        assert!(!registry.is_present(10, 1));
        registry.join(10, conn);
        assert!(registry.is_present(10, 1));
        registry.leave(10, conn);
        assert!(!registry.is_present(10, 1));
    }

    #[tokio::test]
    async fn test_multi_device_presence() {
        let registry = SessionRegistry::new();
        let (phone, _rx1) = connect(&registry, 1);
        let (laptop, _rx2) = connect(&registry, 1);

        registry.join(10, phone);
        registry.join(10, laptop);
        assert!(registry.is_present(10, 1));

        registry.disconnect(phone);
        assert!(registry.is_present(10, 1), "one device still joined");

        registry.disconnect(laptop);
        assert!(!registry.is_present(10, 1));
    }

    #[tokio::test]
    async fn test_broadcast_excludes_one_connection() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = connect(&registry, 1);
        let (b, mut rx_b) = connect(&registry, 2);
        registry.join(10, a);
        registry.join(10, b);

        registry.broadcast(10, &ServerEvent::Connected, Some(a));

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_excluding_user_skips_all_their_devices() {
        let registry = SessionRegistry::new();
        let (phone, mut rx_phone) = connect(&registry, 1);
        let (laptop, mut rx_laptop) = connect(&registry, 1);
        let (other, mut rx_other) = connect(&registry, 2);
        registry.join(10, phone);
        registry.join(10, laptop);
        registry.join(10, other);

        let event = ServerEvent::Typing {
            chat_id: 10,
            user_id: 1,
        };
        registry.broadcast_excluding_user(10, 1, &event);

        assert!(drain(&mut rx_phone).is_empty());
        assert!(drain(&mut rx_laptop).is_empty());
        assert_eq!(drain(&mut rx_other).len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_cleans_every_room() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = connect(&registry, 1);
        registry.join(10, conn);
        registry.join(11, conn);

        let (user, mut rooms) = registry.disconnect(conn).expect("known connection");
        rooms.sort_unstable();
        assert_eq!(user, 1);
        assert_eq!(rooms, vec![10, 11]);
        assert_eq!(registry.room_size(10), 0);
        assert_eq!(registry.room_size(11), 0);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_no_ops() {
        let registry = SessionRegistry::new();
        let ghost = Uuid::new_v4();

        registry.join(10, ghost);
        registry.leave(10, ghost);
        assert!(registry.disconnect(ghost).is_none());
        assert_eq!(registry.room_size(10), 0);
        registry.broadcast(10, &ServerEvent::Connected, None);
    }

    #[tokio::test]
    async fn test_closed_receiver_does_not_block_others() {
        let registry = SessionRegistry::new();
        let (a, rx_a) = connect(&registry, 1);
        let (b, mut rx_b) = connect(&registry, 2);
        registry.join(10, a);
        registry.join(10, b);

        drop(rx_a);

        registry.broadcast(10, &ServerEvent::Connected, None);
        assert_eq!(drain(&mut rx_b).len(), 1, "live member still receives");
    }
}

//! Presence/typing coordinator.
//!
//! One two-state machine per (chat, user): `Idle` or `Typing`, with a
//! monotonic last-activity timestamp. The first signal while idle
//! broadcasts `typing` exactly once; every signal refreshes the timestamp
//! and schedules a quiet-window check. A check that fires re-reads the
//! timestamp and only the one observing (still typing, window elapsed)
//! broadcasts `stop typing`; duplicate checks after the transition are
//! no-ops, so any number of them may be in flight.
//!
//! Broadcast failures are swallowed; presence is advisory.

use crate::events::ServerEvent;
use crate::models::{ChatId, UserId};
use crate::state::SessionRegistry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypingState {
    Idle,
    Typing,
}

#[derive(Debug)]
struct TypingEntry {
    state: TypingState,
    last_activity: Instant,
}

/// Coordinates typing presence for all chats.
pub struct TypingCoordinator {
    registry: Arc<SessionRegistry>,
    /// Entries are Arc'd out of the map before locking so no DashMap shard
    /// guard is ever held while a deferred check runs.
    entries: Arc<DashMap<(ChatId, UserId), Arc<Mutex<TypingEntry>>>>,
    quiet_window: Duration,
}

impl TypingCoordinator {
    /// Create a coordinator broadcasting through `registry`.
    pub fn new(registry: Arc<SessionRegistry>, quiet_window: Duration) -> Self {
        Self {
            registry,
            entries: Arc::new(DashMap::new()),
            quiet_window,
        }
    }

    /// The configured quiet window.
    pub fn quiet_window(&self) -> Duration {
        self.quiet_window
    }

    /// Record a keystroke-equivalent signal.
    ///
    /// Broadcasts `typing` only on the idle -> typing transition, not per
    /// keystroke, which bounds broadcast volume for fast typists.
    pub fn signal(&self, chat: ChatId, user: UserId) {
        let entry = self
            .entries
            .entry((chat, user))
            .or_insert_with(|| {
                Arc::new(Mutex::new(TypingEntry {
                    state: TypingState::Idle,
                    last_activity: Instant::now(),
                }))
            })
            .clone();

        let started = {
            let mut e = entry.lock();
            e.last_activity = Instant::now();
            match e.state {
                TypingState::Idle => {
                    e.state = TypingState::Typing;
                    true
                }
                TypingState::Typing => false,
            }
        };

        if started {
            self.registry.broadcast_excluding_user(
                chat,
                user,
                &ServerEvent::Typing {
                    chat_id: chat,
                    user_id: user,
                },
            );
        }

        // One deferred check per signal. Whichever check observes the quiet
        // window satisfied performs the transition; the rest are no-ops.
        let registry = Arc::clone(&self.registry);
        let window = self.quiet_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            Self::reconcile(&registry, &entry, chat, user, window);
        });
    }

    /// Explicit end of typing (the client submitted or cleared the input).
    pub fn stop(&self, chat: ChatId, user: UserId) {
        let Some(entry) = self.entries.get(&(chat, user)).map(|e| e.value().clone()) else {
            return;
        };
        Self::transition_to_idle(&self.registry, &entry, chat, user);
    }

    /// Quiet-window check, shared by every deferred task.
    fn reconcile(
        registry: &SessionRegistry,
        entry: &Mutex<TypingEntry>,
        chat: ChatId,
        user: UserId,
        window: Duration,
    ) {
        let expired = {
            let e = entry.lock();
            e.state == TypingState::Typing && e.last_activity.elapsed() >= window
        };
        if !expired {
            trace!(chat = chat, user = user, "Typing check: still active or already idle");
            return;
        }
        Self::transition_to_idle(registry, entry, chat, user);
    }

    /// Idempotent typing -> idle transition with exactly one broadcast.
    fn transition_to_idle(
        registry: &SessionRegistry,
        entry: &Mutex<TypingEntry>,
        chat: ChatId,
        user: UserId,
    ) {
        let transitioned = {
            let mut e = entry.lock();
            if e.state == TypingState::Typing {
                e.state = TypingState::Idle;
                true
            } else {
                false
            }
        };

        if transitioned {
            registry.broadcast_excluding_user(
                chat,
                user,
                &ServerEvent::StopTyping {
                    chat_id: chat,
                    user_id: user,
                },
            );
        }
    }

    /// Drop entries that have been idle for a while. Returns how many were
    /// removed. Run from a periodic maintenance task; the map otherwise
    /// grows with every (chat, user) pair that ever typed.
    pub fn prune_idle(&self, older_than: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            let e = entry.lock();
            e.state == TypingState::Typing || e.last_activity.elapsed() < older_than
        });
        before - self.entries.len()
    }
}

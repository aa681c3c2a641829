//! Integration test common infrastructure.
//!
//! Builds an in-process app over an in-memory database: gate, dispatcher
//! and session registry wired exactly as in `main.rs`.

use palaverd::db::Database;
use palaverd::dispatch::MessageDispatcher;
use palaverd::events::ServerEvent;
use palaverd::gate::ChatGate;
use palaverd::models::UserId;
use palaverd::state::registry::{ConnId, OUTGOING_QUEUE_DEPTH};
use palaverd::state::SessionRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct TestApp {
    pub gate: ChatGate,
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<MessageDispatcher>,
}

/// Fresh app over a private in-memory database.
pub async fn test_app() -> TestApp {
    let db = Database::new(":memory:").await.expect("in-memory database");
    let registry = Arc::new(SessionRegistry::new());
    let dispatcher = Arc::new(MessageDispatcher::new(Arc::clone(&registry)));
    let gate = ChatGate::new(db, Arc::clone(&dispatcher));

    TestApp {
        gate,
        registry,
        dispatcher,
    }
}

/// Seed `n` users, returning their ids.
#[allow(dead_code)]
pub async fn seed_users(app: &TestApp, n: usize) -> Vec<UserId> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let user = app
            .gate
            .db()
            .users()
            .create(
                &format!("user{i}"),
                &format!("user{i}@example.com"),
                None,
            )
            .await
            .expect("seed user");
        ids.push(user.id);
    }
    ids
}

/// Register a live connection for `user`, returning its id and receiver.
#[allow(dead_code)]
pub fn connect(app: &TestApp, user: UserId) -> (ConnId, mpsc::Receiver<ServerEvent>) {
    let (tx, rx) = mpsc::channel(OUTGOING_QUEUE_DEPTH);
    let conn = Uuid::new_v4();
    app.registry.register(user, conn, tx);
    (conn, rx)
}

/// Drain everything currently queued for a connection.
#[allow(dead_code)]
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

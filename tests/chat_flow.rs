//! Integration tests for 1:1 chats, message sending and the live/fallback
//! delivery split.

mod common;

use common::{connect, drain, seed_users, test_app};
use palaverd::events::ServerEvent;
use palaverd::models::MediaDescriptor;

#[tokio::test]
async fn test_direct_chat_shape() {
    let app = test_app().await;
    let users = seed_users(&app, 2).await;

    let chat = app
        .gate
        .access_chat(users[0], users[1])
        .await
        .expect("direct chat");

    assert!(!chat.is_group_chat);
    assert!(!chat.is_protected);
    assert_eq!(chat.users.len(), 2);
    assert!(chat.group_admin.is_none());
}

#[tokio::test]
async fn test_access_chat_is_idempotent() {
    let app = test_app().await;
    let users = seed_users(&app, 2).await;

    let first = app
        .gate
        .access_chat(users[0], users[1])
        .await
        .expect("first call");
    let second = app
        .gate
        .access_chat(users[1], users[0])
        .await
        .expect("swapped order");
    assert_eq!(first.id, second.id);

    // Concurrent find-or-create converges on one chat.
    let (a, b) = tokio::join!(
        app.gate.access_chat(users[0], users[1]),
        app.gate.access_chat(users[0], users[1]),
    );
    assert_eq!(a.expect("a").id, first.id);
    assert_eq!(b.expect("b").id, first.id);
}

#[tokio::test]
async fn test_access_chat_rejects_self_and_unknown_peers() {
    let app = test_app().await;
    let users = seed_users(&app, 1).await;

    let err = app
        .gate
        .access_chat(users[0], users[0])
        .await
        .expect_err("self chat");
    assert_eq!(err.status_code(), 400);

    let err = app
        .gate
        .access_chat(users[0], 999_999)
        .await
        .expect_err("unknown peer");
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_send_message_validates_input_and_membership() {
    let app = test_app().await;
    let users = seed_users(&app, 3).await;

    let chat = app
        .gate
        .access_chat(users[0], users[1])
        .await
        .expect("direct chat");

    let err = app
        .gate
        .send_message(users[0], chat.id, Some("   "), None)
        .await
        .expect_err("blank content, no media");
    assert_eq!(err.status_code(), 400);

    let err = app
        .gate
        .send_message(users[2], chat.id, Some("hi"), None)
        .await
        .expect_err("non-member sender");
    assert_eq!(err.status_code(), 403);

    let err = app
        .gate
        .send_message(users[0], 999_999, Some("hi"), None)
        .await
        .expect_err("absent chat");
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_send_message_updates_latest_and_history_order() {
    let app = test_app().await;
    let users = seed_users(&app, 2).await;

    let chat = app
        .gate
        .access_chat(users[0], users[1])
        .await
        .expect("direct chat");

    let first = app
        .gate
        .send_message(users[0], chat.id, Some("one"), None)
        .await
        .expect("send");
    let second = app
        .gate
        .send_message(users[1], chat.id, Some("two"), None)
        .await
        .expect("send");
    assert!(second.id > first.id);

    let history = app
        .gate
        .messages_for_chat(chat.id)
        .await
        .expect("history");
    assert_eq!(
        history.iter().map(|m| m.id).collect::<Vec<_>>(),
        vec![first.id, second.id],
        "history is creation order"
    );

    let refreshed = app
        .gate
        .access_chat(users[0], users[1])
        .await
        .expect("refetch");
    assert_eq!(
        refreshed.latest_message.map(|m| m.id),
        Some(second.id),
        "latest message tracks the newest send"
    );
}

#[tokio::test]
async fn test_media_message_round_trip() {
    let app = test_app().await;
    let users = seed_users(&app, 2).await;

    let chat = app
        .gate
        .access_chat(users[0], users[1])
        .await
        .expect("direct chat");

    let media = MediaDescriptor {
        url: "https://cdn.example/uploads/report.pdf".into(),
        media_type: "pdf".into(),
        filename: Some("report.pdf".into()),
        size: Some(48_213),
    };

    // Media-only messages are valid; blank content is normalized away.
    let sent = app
        .gate
        .send_message(users[0], chat.id, Some(""), Some(media.clone()))
        .await
        .expect("media message");
    assert_eq!(sent.content, None);
    assert_eq!(sent.media.as_ref(), Some(&media));

    let fetched = app
        .gate
        .db()
        .messages()
        .find_populated(sent.id)
        .await
        .expect("lookup")
        .expect("exists");
    assert_eq!(fetched.media, Some(media));
}

#[tokio::test]
async fn test_present_member_gets_live_delivery() {
    let app = test_app().await;
    let users = seed_users(&app, 2).await;

    let chat = app
        .gate
        .access_chat(users[0], users[1])
        .await
        .expect("direct chat");

    let (conn, mut rx) = connect(&app, users[1]);
    app.registry.join(chat.id, conn);

    let sent = app
        .gate
        .send_message(users[0], chat.id, Some("hello"), None)
        .await
        .expect("send");

    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    match &events[0] {
        ServerEvent::MessageReceived { message } => {
            assert_eq!(message.id, sent.id);
            assert_eq!(message.sender.id, users[0]);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(
        app.dispatcher.notifications().pending_count(users[1]),
        0,
        "live delivery leaves nothing pending"
    );
}

#[tokio::test]
async fn test_absent_member_accumulates_notifications() {
    let app = test_app().await;
    let users = seed_users(&app, 2).await;

    let chat = app
        .gate
        .access_chat(users[0], users[1])
        .await
        .expect("direct chat");

    let first = app
        .gate
        .send_message(users[0], chat.id, Some("one"), None)
        .await
        .expect("send");
    assert_eq!(app.dispatcher.notifications().pending_count(users[1]), 1);

    let second = app
        .gate
        .send_message(users[0], chat.id, Some("two"), None)
        .await
        .expect("send");
    assert_eq!(
        app.dispatcher.notifications().pending_count(users[1]),
        2,
        "distinct messages accumulate, no merge or loss"
    );

    let drained = app.dispatcher.notifications().take(users[1]);
    assert_eq!(
        drained.iter().map(|n| n.message_id).collect::<Vec<_>>(),
        vec![first.id, second.id]
    );
    assert_eq!(app.dispatcher.notifications().pending_count(users[1]), 0);
}

#[tokio::test]
async fn test_redispatch_re_reads_the_store() {
    let app = test_app().await;
    let users = seed_users(&app, 3).await;

    let chat = app
        .gate
        .access_chat(users[0], users[1])
        .await
        .expect("direct chat");
    let sent = app
        .gate
        .send_message(users[0], chat.id, Some("hello"), None)
        .await
        .expect("send");

    let (conn, mut rx) = connect(&app, users[1]);
    app.registry.join(chat.id, conn);

    // The wire `new message` path: re-read by id and fan out.
    app.gate
        .dispatch_existing(sent.id, users[0])
        .await
        .expect("redispatch");
    assert_eq!(drain(&mut rx).len(), 1);

    let err = app
        .gate
        .dispatch_existing(999_999, users[0])
        .await
        .expect_err("unknown message");
    assert_eq!(err.status_code(), 404);

    let err = app
        .gate
        .dispatch_existing(sent.id, users[2])
        .await
        .expect_err("requester outside the chat");
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn test_fetch_chats_orders_by_activity() {
    let app = test_app().await;
    let users = seed_users(&app, 3).await;

    let older = app
        .gate
        .access_chat(users[0], users[1])
        .await
        .expect("chat a");
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let newer = app
        .gate
        .create_group("Team", &[users[1], users[2]], users[0], None)
        .await
        .expect("chat b");

    // Activity in the older chat bumps it to the front.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    app.gate
        .send_message(users[0], older.id, Some("ping"), None)
        .await
        .expect("send");

    let chats = app.gate.fetch_chats(users[0]).await.expect("fetch");
    assert_eq!(chats.len(), 2);
    assert_eq!(chats[0].id, older.id);
    assert_eq!(chats[1].id, newer.id);

    // A user outside both sees neither.
    let none = app
        .gate
        .fetch_chats(999_999)
        .await
        .expect("fetch for unknown user");
    assert!(none.is_empty());
}

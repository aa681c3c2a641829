//! Per-connection event loop.
//!
//! Each connection carries typed JSON events both ways over one WebSocket.
//! Outgoing events (replies, broadcasts, live deliveries) funnel through a
//! bounded mpsc queue owned by this loop, so registry fan-out never touches
//! the socket directly. A dropped connection cancels nothing beyond its own
//! session and room cleanup.

use crate::error::{ApiError, ApiResult, ErrorBody};
use crate::events::{ClientEvent, ServerEvent};
use crate::gate::ChatGate;
use crate::models::UserId;
use crate::state::registry::OUTGOING_QUEUE_DEPTH;
use crate::state::{ConnId, SessionRegistry, TypingCoordinator};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info};
use uuid::Uuid;

/// One live client connection.
pub struct Connection {
    conn_id: ConnId,
    peer: SocketAddr,
    registry: Arc<SessionRegistry>,
    typing: Arc<TypingCoordinator>,
    gate: Arc<ChatGate>,
    outgoing: mpsc::Sender<ServerEvent>,
    /// Set by the `setup` event; everything else requires it.
    user_id: Option<UserId>,
}

impl Connection {
    /// Drive a connection from WebSocket handshake to cleanup.
    pub async fn run(
        stream: TcpStream,
        peer: SocketAddr,
        registry: Arc<SessionRegistry>,
        typing: Arc<TypingCoordinator>,
        gate: Arc<ChatGate>,
    ) {
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!(%peer, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        let (mut ws_tx, mut ws_rx) = ws.split();
        let (outgoing, mut outgoing_rx) = mpsc::channel(OUTGOING_QUEUE_DEPTH);

        let mut conn = Connection {
            conn_id: Uuid::new_v4(),
            peer,
            registry,
            typing,
            gate,
            outgoing,
            user_id: None,
        };

        debug!(conn = %conn.conn_id, %peer, "Connection open");

        loop {
            tokio::select! {
                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(frame))) => {
                            conn.handle_frame(&frame).await;
                        }
                        Some(Ok(WsMessage::Ping(payload))) => {
                            if ws_tx.send(WsMessage::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => {
                            // Binary and pong frames carry nothing for us.
                        }
                        Some(Err(e)) => {
                            debug!(conn = %conn.conn_id, error = %e, "Read error");
                            break;
                        }
                    }
                }
                event = outgoing_rx.recv() => {
                    // The queue cannot close while `conn.outgoing` is alive.
                    let Some(event) = event else { break };
                    if ws_tx.send(WsMessage::Text(event.to_frame())).await.is_err() {
                        break;
                    }
                }
            }
        }

        conn.cleanup();
    }

    /// Parse one text frame and apply it; failures become `error` events
    /// on this connection only.
    async fn handle_frame(&mut self, frame: &str) {
        let event = match ClientEvent::parse(frame) {
            Ok(event) => event,
            Err(e) => {
                debug!(conn = %self.conn_id, error = %e, "Malformed event payload");
                self.send(ServerEvent::Error {
                    status: 400,
                    body: ErrorBody {
                        message: "malformed event payload".into(),
                    },
                });
                return;
            }
        };

        if let Err(e) = self.handle_event(event).await {
            info!(
                conn = %self.conn_id,
                code = e.error_code(),
                error = %e,
                "Event rejected"
            );
            self.send(ServerEvent::Error {
                status: e.status_code(),
                body: e.to_body(),
            });
        }
    }

    async fn handle_event(&mut self, event: ClientEvent) -> ApiResult<()> {
        match event {
            ClientEvent::Setup { user_id } => {
                // Re-registering would orphan this connection's room state.
                if self.user_id.is_some() {
                    return Err(ApiError::BadRequest("connection is already set up".into()));
                }
                if !self.gate.db().users().exists(user_id).await? {
                    return Err(ApiError::NotFound(format!("user {user_id} not found")));
                }

                self.user_id = Some(user_id);
                self.registry
                    .register(user_id, self.conn_id, self.outgoing.clone());
                info!(conn = %self.conn_id, user = user_id, peer = %self.peer, "Session set up");

                self.send(ServerEvent::Connected);

                // Notification-fallback drain: everything queued while this
                // user had no joined connection.
                let notifications = self.gate.dispatcher().notifications().take(user_id);
                self.send(ServerEvent::PendingNotifications { notifications });
                Ok(())
            }

            ClientEvent::JoinChat { chat_id } => {
                let user = self.require_setup()?;

                // Checked against the store so a socket cannot watch a room
                // its user does not belong to.
                if self.gate.db().chats().find_row(chat_id).await?.is_none() {
                    return Err(ApiError::NotFound("chat not found".into()));
                }
                if !self.gate.db().chats().is_member(chat_id, user).await? {
                    return Err(ApiError::Forbidden(
                        "you are not a member of this chat".into(),
                    ));
                }

                self.registry.join(chat_id, self.conn_id);
                Ok(())
            }

            ClientEvent::LeaveChat { chat_id } => {
                let user = self.require_setup()?;
                self.registry.leave(chat_id, self.conn_id);
                if !self.registry.is_present(chat_id, user) {
                    self.typing.stop(chat_id, user);
                }
                Ok(())
            }

            ClientEvent::Typing { chat_id } => {
                let user = self.require_setup()?;
                // Signals from users not watching the room are no-ops.
                if self.registry.is_present(chat_id, user) {
                    self.typing.signal(chat_id, user);
                }
                Ok(())
            }

            ClientEvent::StopTyping { chat_id } => {
                let user = self.require_setup()?;
                self.typing.stop(chat_id, user);
                Ok(())
            }

            ClientEvent::NewMessage { message_id } => {
                let user = self.require_setup()?;
                self.gate.dispatch_existing(message_id, user).await?;
                Ok(())
            }
        }
    }

    fn require_setup(&self) -> ApiResult<UserId> {
        self.user_id
            .ok_or_else(|| ApiError::Unauthorized("setup required before other events".into()))
    }

    /// Queue an event for this connection; a full queue drops it.
    fn send(&self, event: ServerEvent) {
        if let Err(e) = self.outgoing.try_send(event) {
            debug!(conn = %self.conn_id, error = %e, "Dropped outgoing event");
        }
    }

    /// Remove this connection from the registry and every room it joined,
    /// ending its typing indicators where it was the user's last presence.
    fn cleanup(&self) {
        if let Some((user, rooms)) = self.registry.disconnect(self.conn_id) {
            for chat in rooms {
                if !self.registry.is_present(chat, user) {
                    self.typing.stop(chat, user);
                }
            }
        }
        debug!(conn = %self.conn_id, peer = %self.peer, "Connection closed");
    }
}

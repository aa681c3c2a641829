//! Gateway - listener that accepts incoming WebSocket connections.
//!
//! Binds the socket and spawns one [`Connection`] task per client. TLS is
//! terminated at the boundary proxy.

use crate::gate::ChatGate;
use crate::network::Connection;
use crate::state::{SessionRegistry, TypingCoordinator};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// The Gateway accepts incoming connections and spawns handlers.
pub struct Gateway {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    typing: Arc<TypingCoordinator>,
    gate: Arc<ChatGate>,
}

impl Gateway {
    /// Bind the gateway to the specified address.
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<SessionRegistry>,
        typing: Arc<TypingCoordinator>,
        gate: Arc<ChatGate>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "WebSocket listener bound");

        Ok(Self {
            listener,
            registry,
            typing,
            gate,
        })
    }

    /// The address the listener actually bound to (useful with port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    continue;
                }
            };

            let registry = Arc::clone(&self.registry);
            let typing = Arc::clone(&self.typing);
            let gate = Arc::clone(&self.gate);

            tokio::spawn(async move {
                Connection::run(stream, peer, registry, typing, gate).await;
            });
        }
    }
}

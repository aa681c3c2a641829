//! palaverd - Palaver chat daemon.

use palaverd::config::Config;
use palaverd::db::Database;
use palaverd::dispatch::MessageDispatcher;
use palaverd::gate::ChatGate;
use palaverd::network::Gateway;
use palaverd::state::{SessionRegistry, TypingCoordinator};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Idle typing entries older than this are dropped by the sweep task.
const TYPING_RETENTION: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(server = %config.server.name, "Starting palaverd");

    let db_path = config
        .database
        .as_ref()
        .map(|d| d.path.as_str())
        .unwrap_or("palaver.db");
    let db = Database::new(db_path).await?;

    let registry = Arc::new(SessionRegistry::new());
    let typing = Arc::new(TypingCoordinator::new(
        Arc::clone(&registry),
        Duration::from_millis(config.presence.typing_quiet_ms),
    ));
    let dispatcher = Arc::new(MessageDispatcher::new(Arc::clone(&registry)));
    let gate = Arc::new(ChatGate::new(db, Arc::clone(&dispatcher)));

    if config.summarize.is_some() {
        info!("Summarization service configured");
    } else {
        info!("Summarization disabled");
    }

    // Sweep idle typing entries so the map does not grow with every
    // (chat, user) pair that ever typed.
    {
        let typing = Arc::clone(&typing);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(600));
            loop {
                interval.tick().await;
                let removed = typing.prune_idle(TYPING_RETENTION);
                if removed > 0 {
                    info!(removed = removed, "Stale typing entries pruned");
                }
            }
        });
    }

    let gateway = Gateway::bind(config.listen.address, registry, typing, gate).await?;

    gateway.run().await
}

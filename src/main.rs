use std::sync::Arc;

use rustaplay::{
    common::{logger, types::AnyResult},
    configs::Config,
    node::NullSinkFactory,
    player::{Player, PlayerEvent},
    sources::LocalExtractor,
    transport::http_server,
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = Config::load()?;
    logger::init(&config);

    let player = Player::with_sinks(&config, Arc::new(NullSinkFactory))?;
    player.register_extractor(Arc::new(LocalExtractor::new()));

    let shutdown = CancellationToken::new();
    tokio::spawn(log_events(player.clone(), shutdown.clone()));

    let server = if config.server.enabled {
        let server_config = config.server.clone();
        let player = player.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = http_server::serve(&server_config, player, shutdown).await {
                error!("Status API stopped: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Rustaplay v{} started", env!("CARGO_PKG_VERSION"));
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    shutdown.cancel();
    player.shutdown().await;
    if let Some(server) = server {
        let _ = server.await;
    }
    Ok(())
}

async fn log_events(player: Arc<Player>, shutdown: CancellationToken) {
    let mut events = player.subscribe();
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(PlayerEvent::NodeLost { node, reason, tenants }) => {
                warn!("{} lost ({:?}), {} session(s) idle", node, reason, tenants.len());
            }
            Ok(PlayerEvent::Error { tenant, message }) => {
                warn!("[{}] {}", tenant.as_deref().unwrap_or("pool"), message);
            }
            Ok(event) => debug!(
                "[{}] {}",
                event.tenant().map(|t| t.to_string()).unwrap_or_default(),
                event.name()
            ),
            Err(RecvError::Lagged(skipped)) => warn!("Event log lagged, {} events dropped", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

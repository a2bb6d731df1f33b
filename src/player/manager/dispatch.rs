use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    node::PoolEvent,
    player::{context::PlayerContext, events::PlayerEvent, registry::SessionRegistry},
};

/// Routes pool events to the sessions they belong to until `shutdown`.
pub(crate) async fn run(
    events: flume::Receiver<PoolEvent>,
    registry: Arc<SessionRegistry>,
    ctx: Arc<PlayerContext>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = events.recv_async() => event,
        };

        match event {
            Ok(event) => route(event, &registry, &ctx).await,
            Err(flume::RecvError::Disconnected) => break,
        }
    }
    debug!("Event dispatcher stopped");
}

async fn route(event: PoolEvent, registry: &SessionRegistry, ctx: &PlayerContext) {
    match event {
        PoolEvent::Session { node, event } => match registry.resolve(&event.tenant) {
            Some(session) if session.node() == Some(node) => {
                session.handle_node_event(event.kind).await;
            }
            _ => debug!("Dropping event from {} for unbound tenant {}", node, event.tenant),
        },
        PoolEvent::Connected {
            node,
            tenant,
            channel,
        } => match registry.resolve(&tenant) {
            Some(session) if session.node() == Some(node) => {
                session.on_connected(node, channel).await;
            }
            _ => debug!("{} connected unknown tenant {}", node, tenant),
        },
        PoolEvent::Error { node, message } => {
            warn!("Node error ({:?}): {}", node, message);
            ctx.emit(PlayerEvent::Error {
                tenant: None,
                message,
            });
        }
        PoolEvent::Exit { node, reason } => {
            let mut tenants = Vec::new();
            for session in registry.sessions_on(node) {
                if session.on_node_lost(node).await {
                    tenants.push(session.tenant().clone());
                }
            }
            if !tenants.is_empty() {
                warn!("{} left the pool with {} session(s) unbound", node, tenants.len());
            }
            ctx.emit(PlayerEvent::NodeLost {
                node,
                reason,
                tenants,
            });
        }
        PoolEvent::ResourceSample { .. } | PoolEvent::HeartbeatAck { .. } => {}
    }
}

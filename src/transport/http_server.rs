use std::{net::SocketAddr, sync::Arc};

use axum::{Router, middleware, routing::get};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    common::types::AnyResult,
    configs::ServerConfig,
    player::Player,
    transport::{
        middleware::add_response_headers,
        routes::{get_info, get_nodes, get_session, get_sessions, get_stats, get_version},
    },
};

const API_V1: &str = "/v1";

pub fn router(player: Arc<Player>) -> Router {
    let v1_routes = Router::new()
        .route("/info", get(get_info))
        .route("/stats", get(get_stats))
        .route("/nodes", get(get_nodes))
        .route("/sessions", get(get_sessions))
        .route("/sessions/{tenant}", get(get_session));

    Router::new()
        .nest(API_V1, v1_routes)
        .route("/version", get(get_version))
        .layer(middleware::from_fn(add_response_headers))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(player)
}

/// Serves the status API until `shutdown` is cancelled.
pub async fn serve(
    config: &ServerConfig,
    player: Arc<Player>,
    shutdown: CancellationToken,
) -> AnyResult<()> {
    let address: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("Status API listening on {}", address);

    axum::serve(listener, router(player))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

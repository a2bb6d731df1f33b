use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};

use crate::{common::errors::ApiError, player::Player};

/// GET /v1/sessions/{tenant}
pub async fn get_session(
    Path(tenant): Path<String>,
    State(player): State<Arc<Player>>,
) -> impl IntoResponse {
    tracing::debug!("GET /v1/sessions/{}", tenant);

    match player.resolve(&tenant) {
        Some(session) => (StatusCode::OK, Json(session.stats().await)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiError::not_found(
                "Session not found",
                format!("/v1/sessions/{}", tenant),
            )),
        )
            .into_response(),
    }
}

/// GET /v1/sessions
pub async fn get_sessions(State(player): State<Arc<Player>>) -> impl IntoResponse {
    tracing::debug!("GET /v1/sessions");

    let mut stats = Vec::new();
    for session in player.sessions().all() {
        stats.push(session.stats().await);
    }
    stats.sort_by(|a, b| a.tenant.cmp(&b.tenant));
    Json(stats)
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;
    use crate::{configs::Config, node::testing::ScriptedSpawner};

    #[tokio::test(start_paused = true)]
    async fn test_unknown_tenant_is_404() {
        let player = Player::new(&Config::default(), Arc::new(ScriptedSpawner::new())).unwrap();
        player.session("known").await.unwrap();

        let response = get_session(Path("missing".into()), State(player.clone()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["path"], "/v1/sessions/missing");

        let response = get_session(Path("known".into()), State(player))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["tenant"], "known");
        assert_eq!(body["status"], "idle");
        assert_eq!(body["volume"], 100);
    }
}

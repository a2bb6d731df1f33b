use std::sync::Arc;

use axum::{extract::State, response::Json};
use serde::Serialize;

use crate::{configs::NodeRuntimeKind, monitoring::PlayerStats, node::NodeSnapshot, player::Player};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    pub version: Version,
    pub build_time: u64,
    pub git: GitInfo,
    pub extractors: Vec<String>,
    pub max_nodes: usize,
    pub runtime: NodeRuntimeKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub semver: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitInfo {
    pub branch: String,
    pub commit: String,
    pub commit_time: u64,
}

impl Version {
    fn parse(semver: &str) -> Self {
        let mut parts = semver.split('.');
        let major = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let minor = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let patch = parts
            .next()
            .and_then(|s| {
                s.split(['-', '+'])
                    .next()
                    .and_then(|s| s.parse().ok())
            })
            .unwrap_or(0);
        Self {
            semver: semver.to_string(),
            major,
            minor,
            patch,
        }
    }
}

/// GET /v1/info
pub async fn get_info(State(player): State<Arc<Player>>) -> Json<Info> {
    tracing::debug!("GET /v1/info");
    Json(Info {
        version: Version::parse(env!("CARGO_PKG_VERSION")),
        build_time: option_env!("BUILD_TIME")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        git: GitInfo {
            branch: option_env!("GIT_BRANCH").unwrap_or("unknown").to_string(),
            commit: option_env!("GIT_COMMIT").unwrap_or("unknown").to_string(),
            commit_time: option_env!("GIT_COMMIT_TIME")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        },
        extractors: player.extractors().identifiers(),
        max_nodes: player.pool().max_nodes(),
        runtime: player.runtime(),
    })
}

/// GET /v1/stats
pub async fn get_stats(State(player): State<Arc<Player>>) -> Json<PlayerStats> {
    tracing::debug!("GET /v1/stats");
    Json(player.stats())
}

/// GET /v1/nodes
pub async fn get_nodes(State(player): State<Arc<Player>>) -> Json<Vec<NodeSnapshot>> {
    tracing::debug!("GET /v1/nodes");
    Json(player.pool().nodes())
}

/// GET /version
pub async fn get_version() -> String {
    tracing::debug!("GET /version");
    env!("CARGO_PKG_VERSION").to_string()
}

pub mod stats_collector;

use serde::Serialize;

use crate::{
    common::types::{ChannelId, NodeId, TenantId},
    player::{PlaybackStatus, Timestamp},
};

pub use stats_collector::{collect_stats, process_rss_bytes};

/// Process-wide figures reported by `GET /v1/stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    pub uptime_ms: u64,
    pub sessions: usize,
    pub playing_sessions: usize,
    pub nodes: usize,
    pub max_nodes: usize,
    pub extractors: usize,
    pub memory: Memory,
    pub cpu: Cpu,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    pub cores: usize,
    pub system_load: f64,
    pub process_load: f64,
}

/// Diagnostic snapshot of one session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub tenant: TenantId,
    pub tracks: usize,
    pub history: usize,
    pub extractors: usize,
    pub volume: u16,
    pub status: PlaybackStatus,
    /// `"<title> by <author>"` of the current track.
    pub current: Option<String>,
    pub progress: Option<Timestamp>,
    pub node: Option<NodeId>,
    pub channel: Option<ChannelId>,
    pub uptime_ms: u64,
    pub versions: Versions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Versions {
    pub player: String,
    pub git_commit: String,
    pub build_time: u64,
}

impl Versions {
    pub fn current() -> Self {
        Self {
            player: env!("CARGO_PKG_VERSION").to_string(),
            git_commit: option_env!("GIT_COMMIT").unwrap_or("unknown").to_string(),
            build_time: option_env!("BUILD_TIME")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        }
    }
}

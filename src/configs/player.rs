use serde::{Deserialize, Serialize};

/// Per-session playback defaults. Every session created by the registry
/// starts from a copy of this.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlayerConfig {
    #[serde(default = "default_true")]
    pub skip_on_no_stream: bool,
    #[serde(default)]
    pub skip_on_empty: bool,
    #[serde(default = "default_true")]
    pub leave_on_stop: bool,
    #[serde(default)]
    pub leave_on_stop_cooldown_ms: u64,
    #[serde(default = "default_true")]
    pub leave_on_empty: bool,
    #[serde(default = "default_leave_on_empty_cooldown_ms")]
    pub leave_on_empty_cooldown_ms: u64,
    pub max_size: Option<usize>,
    #[serde(default = "default_max_history_size")]
    pub max_history_size: usize,
    #[serde(default)]
    pub strategy: QueueStrategy,
    /// Extractor identifiers never asked for a playable stream.
    #[serde(default)]
    pub block_stream_from: Vec<String>,
    /// Prefer the bridged source's duration for timing when one exists.
    #[serde(default = "default_true")]
    pub prefer_bridged_metadata: bool,
    #[serde(default = "default_max_resolution_attempts")]
    pub max_resolution_attempts: u32,
    /// Suppress `AudioTrackAdd` when tracks are inserted at a position.
    #[serde(default)]
    pub no_emit_insert: bool,
    #[serde(default = "default_volume")]
    pub default_volume: u16,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            skip_on_no_stream: true,
            skip_on_empty: false,
            leave_on_stop: true,
            leave_on_stop_cooldown_ms: 0,
            leave_on_empty: true,
            leave_on_empty_cooldown_ms: default_leave_on_empty_cooldown_ms(),
            max_size: None,
            max_history_size: default_max_history_size(),
            strategy: QueueStrategy::default(),
            block_stream_from: Vec::new(),
            prefer_bridged_metadata: true,
            max_resolution_attempts: default_max_resolution_attempts(),
            no_emit_insert: false,
            default_volume: default_volume(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_leave_on_empty_cooldown_ms() -> u64 {
    60_000
}

fn default_max_history_size() -> usize {
    100
}

fn default_max_resolution_attempts() -> u32 {
    10
}

fn default_volume() -> u16 {
    100
}

/// Which end of the pending list the next track comes from.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueStrategy {
    #[default]
    Fifo,
    Lifo,
}

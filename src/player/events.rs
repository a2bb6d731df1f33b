use serde::Serialize;
use tokio::sync::broadcast;

use crate::{
    common::types::{ChannelId, NodeId, TenantId},
    node::ExitReason,
    protocol::tracks::Track,
};

const EVENT_CAPACITY: usize = 1_024;

/// Why a track was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// The node ended the track on request.
    Manual,
    /// No stream could be opened for it.
    NoStream,
    /// The node could not read the stream it was given.
    LoadFailed,
}

/// Everything observable about sessions, queues and nodes.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    AudioTrackAdd {
        tenant: TenantId,
        track: Track,
    },
    AudioTracksAdd {
        tenant: TenantId,
        tracks: Vec<Track>,
    },
    AudioTrackRemove {
        tenant: TenantId,
        track: Track,
    },
    AudioTracksRemove {
        tenant: TenantId,
        tracks: Vec<Track>,
    },
    PlayerStart {
        tenant: TenantId,
        track: Track,
    },
    PlayerFinish {
        tenant: TenantId,
        track: Track,
    },
    PlayerSkip {
        tenant: TenantId,
        track: Track,
        reason: SkipReason,
    },
    PlayerError {
        tenant: TenantId,
        track: Option<Track>,
        message: String,
    },
    PlayerPause {
        tenant: TenantId,
    },
    PlayerResume {
        tenant: TenantId,
    },
    VolumeChange {
        tenant: TenantId,
        old: u16,
        new: u16,
    },
    EmptyQueue {
        tenant: TenantId,
    },
    Connection {
        tenant: TenantId,
        node: NodeId,
        channel: ChannelId,
    },
    Disconnect {
        tenant: TenantId,
    },
    NodeLost {
        node: NodeId,
        reason: ExitReason,
        tenants: Vec<TenantId>,
    },
    SessionCreate {
        tenant: TenantId,
        node: NodeId,
    },
    SessionDelete {
        tenant: TenantId,
    },
    /// Failure not tied to a track, e.g. a node error.
    Error {
        tenant: Option<TenantId>,
        message: String,
    },
}

impl PlayerEvent {
    pub fn tenant(&self) -> Option<&TenantId> {
        match self {
            PlayerEvent::AudioTrackAdd { tenant, .. }
            | PlayerEvent::AudioTracksAdd { tenant, .. }
            | PlayerEvent::AudioTrackRemove { tenant, .. }
            | PlayerEvent::AudioTracksRemove { tenant, .. }
            | PlayerEvent::PlayerStart { tenant, .. }
            | PlayerEvent::PlayerFinish { tenant, .. }
            | PlayerEvent::PlayerSkip { tenant, .. }
            | PlayerEvent::PlayerError { tenant, .. }
            | PlayerEvent::PlayerPause { tenant }
            | PlayerEvent::PlayerResume { tenant }
            | PlayerEvent::VolumeChange { tenant, .. }
            | PlayerEvent::EmptyQueue { tenant }
            | PlayerEvent::Connection { tenant, .. }
            | PlayerEvent::Disconnect { tenant }
            | PlayerEvent::SessionCreate { tenant, .. }
            | PlayerEvent::SessionDelete { tenant } => Some(tenant),
            PlayerEvent::Error { tenant, .. } => tenant.as_ref(),
            PlayerEvent::NodeLost { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::AudioTrackAdd { .. } => "audioTrackAdd",
            PlayerEvent::AudioTracksAdd { .. } => "audioTracksAdd",
            PlayerEvent::AudioTrackRemove { .. } => "audioTrackRemove",
            PlayerEvent::AudioTracksRemove { .. } => "audioTracksRemove",
            PlayerEvent::PlayerStart { .. } => "playerStart",
            PlayerEvent::PlayerFinish { .. } => "playerFinish",
            PlayerEvent::PlayerSkip { .. } => "playerSkip",
            PlayerEvent::PlayerError { .. } => "playerError",
            PlayerEvent::PlayerPause { .. } => "playerPause",
            PlayerEvent::PlayerResume { .. } => "playerResume",
            PlayerEvent::VolumeChange { .. } => "volumeChange",
            PlayerEvent::EmptyQueue { .. } => "emptyQueue",
            PlayerEvent::Connection { .. } => "connection",
            PlayerEvent::Disconnect { .. } => "disconnect",
            PlayerEvent::NodeLost { .. } => "nodeLost",
            PlayerEvent::SessionCreate { .. } => "sessionCreate",
            PlayerEvent::SessionDelete { .. } => "sessionDelete",
            PlayerEvent::Error { .. } => "error",
        }
    }
}

/// Fan-out of [`PlayerEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<PlayerEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: PlayerEvent) {
        tracing::trace!("event {} for {:?}", event.name(), event.tenant());
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }
}

use serde::{Deserialize, Serialize};

use crate::{
    common::types::{ChannelId, TenantId},
    protocol::opcodes::{ControlOp, EventOp},
    sources::ByteSource,
};

/// A single equalizer band. `band` is 0..=14, `gain` is -0.25..=1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqBand {
    pub band: u8,
    pub gain: f32,
}

/// Everything a node needs to reproduce the session's filter chain on a new
/// track. Opaque to the node apart from `volume`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSnapshot {
    pub volume: u16,
    pub filters: Vec<String>,
    pub equalizer: Vec<EqBand>,
    pub biquad: Option<String>,
    pub dsp: bool,
    pub playback_rate: f64,
}

impl Default for FilterSnapshot {
    fn default() -> Self {
        Self {
            volume: 100,
            filters: Vec::new(),
            equalizer: Vec::new(),
            biquad: None,
            dsp: false,
            playback_rate: 1.0,
        }
    }
}

/// Payload of [`ControlMessage::Play`]. The byte stream is moved into the
/// node; it is never shared with the control plane afterwards.
pub struct PlayRequest {
    pub tenant: TenantId,
    pub track_id: String,
    pub title: String,
    pub stream: ByteSource,
    pub seek_ms: u64,
    pub filters: FilterSnapshot,
}

impl std::fmt::Debug for PlayRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayRequest")
            .field("tenant", &self.tenant)
            .field("track_id", &self.track_id)
            .field("title", &self.title)
            .field("seek_ms", &self.seek_ms)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

/// Control plane to node.
#[derive(Debug)]
pub enum ControlMessage {
    HeartBeat,
    JoinChannel {
        tenant: TenantId,
        channel: ChannelId,
        self_deaf: bool,
    },
    Destroy {
        tenant: TenantId,
    },
    SetVolume {
        tenant: TenantId,
        volume: u16,
    },
    SetPaused {
        tenant: TenantId,
        paused: bool,
    },
    SetBitrate {
        tenant: TenantId,
        bitrate: u32,
    },
    SkipTrack {
        tenant: TenantId,
    },
    Stop {
        tenant: TenantId,
    },
    Play(PlayRequest),
    Seek {
        tenant: TenantId,
        position_ms: u64,
    },
    SetFilters {
        tenant: TenantId,
        filters: Vec<String>,
    },
    SetEqualizer {
        tenant: TenantId,
        bands: Vec<EqBand>,
    },
    SetBiquad {
        tenant: TenantId,
        biquad: Option<String>,
    },
    SetDsp {
        tenant: TenantId,
        enabled: bool,
    },
}

impl ControlMessage {
    pub fn op(&self) -> ControlOp {
        match self {
            ControlMessage::HeartBeat => ControlOp::HeartBeat,
            ControlMessage::JoinChannel { .. } => ControlOp::JoinChannel,
            ControlMessage::Destroy { .. } => ControlOp::Destroy,
            ControlMessage::SetVolume { .. } => ControlOp::SetVolume,
            ControlMessage::SetPaused { .. } => ControlOp::SetPaused,
            ControlMessage::SetBitrate { .. } => ControlOp::SetBitrate,
            ControlMessage::SkipTrack { .. } => ControlOp::SkipTrack,
            ControlMessage::Stop { .. } => ControlOp::Stop,
            ControlMessage::Play(_) => ControlOp::Play,
            ControlMessage::Seek { .. } => ControlOp::Seek,
            ControlMessage::SetFilters { .. } => ControlOp::SetFilters,
            ControlMessage::SetEqualizer { .. } => ControlOp::SetEqualizer,
            ControlMessage::SetBiquad { .. } => ControlOp::SetBiquad,
            ControlMessage::SetDsp { .. } => ControlOp::SetDsp,
        }
    }

    /// The tenant a message is addressed to. `None` for node-wide messages.
    pub fn tenant(&self) -> Option<&TenantId> {
        match self {
            ControlMessage::HeartBeat => None,
            ControlMessage::Play(req) => Some(&req.tenant),
            ControlMessage::JoinChannel { tenant, .. }
            | ControlMessage::Destroy { tenant }
            | ControlMessage::SetVolume { tenant, .. }
            | ControlMessage::SetPaused { tenant, .. }
            | ControlMessage::SetBitrate { tenant, .. }
            | ControlMessage::SkipTrack { tenant }
            | ControlMessage::Stop { tenant }
            | ControlMessage::Seek { tenant, .. }
            | ControlMessage::SetFilters { tenant, .. }
            | ControlMessage::SetEqualizer { tenant, .. }
            | ControlMessage::SetBiquad { tenant, .. }
            | ControlMessage::SetDsp { tenant, .. } => Some(tenant),
        }
    }
}

/// Memory accounting reported by a node with every heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    /// Bytes the node currently holds for playback (buffers plus per-track state).
    pub heap_used: u64,
    /// High-water mark of `heap_used`.
    pub heap_total: u64,
    /// Bytes pulled from byte sources since the node started.
    pub external: u64,
    /// Bytes sitting in not-yet-framed PCM buffers.
    pub array_buffers: u64,
    /// Resident set size of the hosting process.
    pub rss: u64,
}

/// Node to control plane.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    Ready,
    Stats(ResourceUsage),
    HeartBeatAck,
    Payload(SessionEvent),
    Connected { tenant: TenantId, channel: ChannelId },
}

impl NodeEvent {
    pub fn op(&self) -> EventOp {
        match self {
            NodeEvent::Ready => EventOp::Ready,
            NodeEvent::Stats(_) => EventOp::Stats,
            NodeEvent::HeartBeatAck => EventOp::HeartBeatAck,
            NodeEvent::Payload(_) => EventOp::Payload,
            NodeEvent::Connected { .. } => EventOp::Connected,
        }
    }
}

/// Playback lifecycle notification for one tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub tenant: TenantId,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    /// First frame of the track reached the sink.
    TrackStart { track_id: String },
    /// `elapsed_ms` is wall-clock playback in the current segment,
    /// `position_ms` the offset into the stream.
    Progress {
        track_id: String,
        elapsed_ms: u64,
        position_ms: u64,
    },
    TrackEnd {
        track_id: String,
        reason: TrackEndReason,
        elapsed_ms: u64,
    },
    Error {
        track_id: Option<String>,
        message: String,
    },
    Disconnected,
}

/// Why a track stopped playing on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Skipped,
    Stopped,
    Replaced,
    Destroyed,
}

impl TrackEndReason {
    /// Whether the control plane may start the next queued track.
    pub fn may_start_next(&self) -> bool {
        matches!(
            self,
            TrackEndReason::Finished | TrackEndReason::LoadFailed | TrackEndReason::Skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_message_op_and_tenant() {
        let msg = ControlMessage::SetPaused {
            tenant: "42".into(),
            paused: true,
        };
        assert_eq!(msg.op(), ControlOp::SetPaused);
        assert_eq!(msg.tenant().map(|t| t.to_string()), Some("42".to_string()));

        assert_eq!(ControlMessage::HeartBeat.op(), ControlOp::HeartBeat);
        assert!(ControlMessage::HeartBeat.tenant().is_none());
    }

    #[test]
    fn test_play_request_debug_omits_stream() {
        let req = PlayRequest {
            tenant: "1".into(),
            track_id: "abc".into(),
            title: "Song".into(),
            stream: Box::pin(futures::stream::empty()),
            seek_ms: 0,
            filters: FilterSnapshot::default(),
        };
        let rendered = format!("{:?}", ControlMessage::Play(req));
        assert!(rendered.contains("track_id: \"abc\""));
        assert!(!rendered.contains("stream"));
    }

    #[test]
    fn test_end_reasons_that_advance_the_queue() {
        assert!(TrackEndReason::Finished.may_start_next());
        assert!(TrackEndReason::Skipped.may_start_next());
        assert!(TrackEndReason::LoadFailed.may_start_next());
        assert!(!TrackEndReason::Stopped.may_start_next());
        assert!(!TrackEndReason::Replaced.may_start_next());
        assert!(!TrackEndReason::Destroyed.may_start_next());
    }
}

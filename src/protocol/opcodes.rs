use serde::{Deserialize, Serialize};

/// Operation tag of a message sent from the control plane to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlOp {
    HeartBeat,
    JoinChannel,
    Destroy,
    SetVolume,
    SetPaused,
    SetBitrate,
    SkipTrack,
    Stop,
    Play,
    Seek,
    SetFilters,
    SetEqualizer,
    SetBiquad,
    SetDsp,
}

impl ControlOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlOp::HeartBeat => "HeartBeat",
            ControlOp::JoinChannel => "JoinChannel",
            ControlOp::Destroy => "Destroy",
            ControlOp::SetVolume => "SetVolume",
            ControlOp::SetPaused => "SetPaused",
            ControlOp::SetBitrate => "SetBitrate",
            ControlOp::SkipTrack => "SkipTrack",
            ControlOp::Stop => "Stop",
            ControlOp::Play => "Play",
            ControlOp::Seek => "Seek",
            ControlOp::SetFilters => "SetFilters",
            ControlOp::SetEqualizer => "SetEqualizer",
            ControlOp::SetBiquad => "SetBiquad",
            ControlOp::SetDsp => "SetDsp",
        }
    }
}

impl std::fmt::Display for ControlOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation tag of a message sent from a node to the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventOp {
    Ready,
    Stats,
    HeartBeatAck,
    Payload,
    Connected,
}

impl EventOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOp::Ready => "Ready",
            EventOp::Stats => "Stats",
            EventOp::HeartBeatAck => "HeartBeatAck",
            EventOp::Payload => "Payload",
            EventOp::Connected => "Connected",
        }
    }
}

impl std::fmt::Display for EventOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    node::constants::AUTO_BITRATE,
    protocol::messages::{EqBand, FilterSnapshot},
};

pub const MAX_VOLUME: u16 = 1_000;

static SAMPLE_RATE_FILTER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"asetrate=\d+\*(\d+(?:\.\d+)?)").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Buffering,
    Playing,
    Paused,
}

impl PlaybackStatus {
    /// Whether a track is loaded on the node.
    pub fn is_active(&self) -> bool {
        !matches!(self, PlaybackStatus::Idle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bitrate {
    Auto,
    Fixed(u32),
}

impl Bitrate {
    pub fn resolve(&self) -> u32 {
        match self {
            Bitrate::Auto => AUTO_BITRATE,
            Bitrate::Fixed(bps) => *bps,
        }
    }
}

/// Playback bookkeeping of one session.
///
/// `accumulated_progress_ms` moves only when a segment completes, on an
/// explicit seek or on reset. Between those, progress events update
/// `segment_elapsed_ms` alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub accumulated_progress_ms: u64,
    pub segment_elapsed_ms: u64,
    pub volume: u16,
    pub transitioning: bool,
    /// Bumped by every `begin`. Node events carry it inside the segment key.
    #[serde(skip)]
    pub generation: u64,
}

impl PlaybackState {
    pub fn new(volume: u16) -> Self {
        Self {
            status: PlaybackStatus::Idle,
            accumulated_progress_ms: 0,
            segment_elapsed_ms: 0,
            volume: volume.min(MAX_VOLUME),
            transitioning: false,
            generation: 0,
        }
    }

    pub fn playback_time_ms(&self) -> u64 {
        self.accumulated_progress_ms + self.segment_elapsed_ms
    }

    /// A new segment starts at `seek_ms`.
    pub fn begin(&mut self, seek_ms: u64) {
        self.accumulated_progress_ms = seek_ms;
        self.segment_elapsed_ms = 0;
        self.status = PlaybackStatus::Buffering;
        self.generation += 1;
    }

    pub fn finish_segment(&mut self) {
        self.accumulated_progress_ms += self.segment_elapsed_ms;
        self.segment_elapsed_ms = 0;
        self.status = PlaybackStatus::Idle;
    }

    pub fn reset(&mut self) {
        self.accumulated_progress_ms = 0;
        self.segment_elapsed_ms = 0;
        self.status = PlaybackStatus::Idle;
        self.transitioning = false;
    }
}

/// Filter configuration re-applied on every track transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    pub filters: Vec<String>,
    pub equalizer: Vec<EqBand>,
    pub biquad: Option<String>,
    pub dsp: bool,
    pub playback_rate: f64,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            equalizer: Vec::new(),
            biquad: None,
            dsp: false,
            playback_rate: 1.0,
        }
    }
}

impl FilterState {
    /// Replaces the filter tokens and derives the playback rate from them.
    pub fn set_filters(&mut self, filters: Vec<String>) {
        self.playback_rate = playback_rate_from(&filters);
        self.filters = filters;
    }

    pub fn snapshot(&self, volume: u16) -> FilterSnapshot {
        FilterSnapshot {
            volume,
            filters: self.filters.clone(),
            equalizer: self.equalizer.clone(),
            biquad: self.biquad.clone(),
            dsp: self.dsp,
            playback_rate: self.playback_rate,
        }
    }
}

/// Sum of the `asetrate=<base>*<factor>` factors in `filters`, or 1.0 when
/// none are present.
pub fn playback_rate_from(filters: &[String]) -> f64 {
    let Some(re) = SAMPLE_RATE_FILTER.as_ref() else {
        return 1.0;
    };
    let factors: Vec<f64> = filters
        .iter()
        .filter_map(|f| re.captures(f))
        .filter_map(|c| c.get(1)?.as_str().parse::<f64>().ok())
        .filter(|f| f.is_finite())
        .collect();

    if factors.is_empty() {
        1.0
    } else {
        factors.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_from_asetrate_tokens() {
        assert_eq!(playback_rate_from(&[]), 1.0);
        assert_eq!(playback_rate_from(&["bass=g=5".into()]), 1.0);
        assert_eq!(
            playback_rate_from(&["aresample=48000,asetrate=48000*1.25".into()]),
            1.25
        );
        assert_eq!(
            playback_rate_from(&["asetrate=48000*0.8".into(), "asetrate=44100*0.2".into()]),
            1.0
        );
    }

    #[test]
    fn test_filter_state_tracks_rate() {
        let mut filters = FilterState::default();
        filters.set_filters(vec!["asetrate=48000*1.5".into()]);
        assert_eq!(filters.playback_rate, 1.5);

        let snapshot = filters.snapshot(80);
        assert_eq!(snapshot.volume, 80);
        assert_eq!(snapshot.playback_rate, 1.5);

        filters.set_filters(Vec::new());
        assert_eq!(filters.playback_rate, 1.0);
    }

    #[test]
    fn test_segment_accounting() {
        let mut state = PlaybackState::new(2_000);
        assert_eq!(state.volume, MAX_VOLUME);

        state.begin(30_000);
        assert_eq!(state.status, PlaybackStatus::Buffering);
        state.segment_elapsed_ms = 5_000;
        assert_eq!(state.playback_time_ms(), 35_000);

        state.finish_segment();
        assert_eq!(state.accumulated_progress_ms, 35_000);
        assert_eq!(state.playback_time_ms(), 35_000);
        assert!(!state.status.is_active());

        state.reset();
        assert_eq!(state.playback_time_ms(), 0);
    }

    #[test]
    fn test_bitrate_auto() {
        assert_eq!(Bitrate::Auto.resolve(), 64_000);
        assert_eq!(Bitrate::Fixed(96_000).resolve(), 96_000);
    }
}

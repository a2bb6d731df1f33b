use serde::Serialize;

use crate::common::{PlayerError, PlayerResult, time_code::build_time_code};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeValue {
    pub label: String,
    pub value: u64,
}

impl TimeValue {
    fn new(value: u64) -> Self {
        Self {
            label: build_time_code(value),
            value,
        }
    }
}

/// Position of the current track, adjusted for the playback rate unless
/// filters are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timestamp {
    pub current: TimeValue,
    pub total: TimeValue,
    /// Percentage of `total` played, 0 when the total is unknown.
    pub progress: u64,
}

impl Timestamp {
    pub fn compute(playback_ms: u64, total_ms: u64, rate: f64, ignore_filters: bool) -> Self {
        let (current, total) = if ignore_filters {
            (playback_ms, total_ms)
        } else {
            (
                estimated_playback_time(playback_ms, rate),
                estimated_duration(total_ms, rate),
            )
        };

        Self {
            current: TimeValue::new(current),
            total: TimeValue::new(total),
            progress: progress_percent(current, total),
        }
    }
}

pub fn estimated_playback_time(playback_ms: u64, rate: f64) -> u64 {
    (rate * playback_ms as f64).round() as u64
}

pub fn estimated_duration(total_ms: u64, rate: f64) -> u64 {
    (total_ms as f64 / rate).round() as u64
}

pub fn progress_percent(current: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    (100.0 * current as f64 / total as f64).round() as u64
}

#[derive(Debug, Clone)]
pub struct ProgressBarOptions {
    pub indicator: String,
    pub left_char: String,
    pub right_char: String,
    pub length: usize,
    pub timecodes: bool,
    pub separator: String,
}

impl Default for ProgressBarOptions {
    fn default() -> Self {
        Self {
            indicator: "\u{1F518}".into(),
            left_char: "\u{25AC}".into(),
            right_char: "\u{25AC}".into(),
            length: 15,
            timecodes: true,
            separator: "\u{2503}".into(),
        }
    }
}

pub fn render_progress_bar(ts: &Timestamp, opts: &ProgressBarOptions) -> PlayerResult<String> {
    let length = opts.length;
    if length == 0 {
        return Err(PlayerError::InvalidArgument(
            "progress bar length must be at least 1".into(),
        ));
    }

    let index = if ts.total.value == 0 {
        0
    } else {
        (ts.current.value as f64 / ts.total.value as f64 * length as f64).round() as usize
    };

    let bar = if (1..=length).contains(&index) {
        format!(
            "{}{}{}",
            opts.left_char.repeat(index - 1),
            opts.indicator,
            opts.right_char.repeat(length - index)
        )
    } else {
        format!("{}{}", opts.indicator, opts.right_char.repeat(length - 1))
    };

    if opts.timecodes {
        Ok(format!(
            "{} {} {} {} {}",
            ts.current.label, opts.separator, bar, opts.separator, ts.total.label
        ))
    } else {
        Ok(bar)
    }
}

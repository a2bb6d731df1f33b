//! PCM framing constants shared by the node runtime and the extractors.

// ── Sample / PCM ─────────────────────────────────────────────────────────────

/// Sample rate every byte source must deliver (Hz).
pub const SAMPLE_RATE: u64 = 48_000;

/// Interleaved stereo.
pub const CHANNELS: u64 = 2;

/// s16le.
pub const BYTES_PER_SAMPLE: u64 = 2;

/// 192 bytes of PCM per millisecond of audio.
pub const BYTES_PER_MS: u64 = SAMPLE_RATE * CHANNELS * BYTES_PER_SAMPLE / 1_000;

// ── Framing ──────────────────────────────────────────────────────────────────

/// One frame is sent to the sink every 20 ms.
pub const FRAME_DURATION_MS: u64 = 20;

/// 3 840 bytes per frame.
pub const FRAME_SIZE_BYTES: usize = (BYTES_PER_MS * FRAME_DURATION_MS) as usize;

/// Progress is reported every 25 frames (500 ms).
pub const PROGRESS_EVERY_FRAMES: u64 = 25;

// ── Accounting ───────────────────────────────────────────────────────────────

/// Fixed bookkeeping cost charged per active track in resource samples.
pub const TRACK_OVERHEAD_BYTES: u64 = 64 * 1_024;

/// Default Opus bitrate used when a session asks for `auto`.
pub const AUTO_BITRATE: u32 = 64_000;

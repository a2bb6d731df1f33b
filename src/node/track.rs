use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU16, AtomicU64, Ordering},
    },
    time::Duration,
};

use byteorder::{ByteOrder, LittleEndian};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::{sync::watch, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    common::types::TenantId,
    node::{
        constants::{BYTES_PER_MS, FRAME_DURATION_MS, FRAME_SIZE_BYTES, PROGRESS_EVERY_FRAMES},
        sink::AudioSink,
    },
    protocol::messages::{NodeEvent, SessionEvent, SessionEventKind, TrackEndReason},
    sources::ByteSource,
};

pub type SharedSink = Arc<tokio::sync::Mutex<Box<dyn AudioSink>>>;

const NO_SEEK: u64 = u64::MAX;

#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u8)]
enum EndCode {
    Unset = 0,
    Skipped = 1,
    Stopped = 2,
    Replaced = 3,
    Destroyed = 4,
}

impl EndCode {
    fn from_reason(reason: TrackEndReason) -> Self {
        match reason {
            TrackEndReason::Skipped => Self::Skipped,
            TrackEndReason::Replaced => Self::Replaced,
            TrackEndReason::Destroyed => Self::Destroyed,
            TrackEndReason::Stopped | TrackEndReason::Finished | TrackEndReason::LoadFailed => {
                Self::Stopped
            }
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Skipped,
            2 => Self::Stopped,
            3 => Self::Replaced,
            4 => Self::Destroyed,
            _ => Self::Unset,
        }
    }

    fn reason(self) -> TrackEndReason {
        match self {
            Self::Skipped => TrackEndReason::Skipped,
            Self::Replaced => TrackEndReason::Replaced,
            Self::Destroyed => TrackEndReason::Destroyed,
            Self::Stopped | Self::Unset => TrackEndReason::Stopped,
        }
    }
}

struct TrackShared {
    paused: watch::Sender<bool>,
    volume: AtomicU16,
    seek_to: AtomicU64,
    end_code: AtomicU8,
    position_ms: AtomicU64,
    buffered: AtomicU64,
    finished: AtomicBool,
    cancel: CancellationToken,
}

/// Control surface of one track playing on a node.
#[derive(Clone)]
pub struct TrackHandle {
    track_id: Arc<str>,
    shared: Arc<TrackShared>,
}

impl TrackHandle {
    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.send_replace(paused);
    }

    pub fn is_paused(&self) -> bool {
        *self.shared.paused.borrow()
    }

    pub fn set_volume(&self, volume: u16) {
        self.shared.volume.store(volume, Ordering::Release);
    }

    /// Skips forward to `position_ms`. Backward seeks need a fresh stream and
    /// are refused.
    pub fn seek(&self, position_ms: u64) -> bool {
        if position_ms < self.position_ms() {
            return false;
        }
        self.shared.seek_to.store(position_ms, Ordering::Release);
        true
    }

    /// Ends the track. The first reason given wins.
    pub fn stop(&self, reason: TrackEndReason) {
        let _ = self.shared.end_code.compare_exchange(
            EndCode::Unset as u8,
            EndCode::from_reason(reason) as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.shared.cancel.cancel();
    }

    pub fn position_ms(&self) -> u64 {
        self.shared.position_ms.load(Ordering::Acquire)
    }

    /// PCM bytes pulled from the source but not yet framed.
    pub fn buffered_bytes(&self) -> u64 {
        self.shared.buffered.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }
}

/// Everything needed to play one track for one tenant.
pub struct TrackJob {
    pub tenant: TenantId,
    pub track_id: String,
    pub stream: ByteSource,
    pub seek_ms: u64,
    pub volume: u16,
    pub sink: SharedSink,
    pub events: flume::Sender<NodeEvent>,
    /// Node-wide counter of bytes pulled from sources.
    pub pulled: Arc<AtomicU64>,
}

/// Spawns the playback task on the current runtime and returns its handle.
pub fn start(job: TrackJob) -> TrackHandle {
    let (paused, _) = watch::channel(false);
    let handle = TrackHandle {
        track_id: Arc::from(job.track_id.as_str()),
        shared: Arc::new(TrackShared {
            paused,
            volume: AtomicU16::new(job.volume),
            seek_to: AtomicU64::new(NO_SEEK),
            end_code: AtomicU8::new(EndCode::Unset as u8),
            position_ms: AtomicU64::new(job.seek_ms),
            buffered: AtomicU64::new(0),
            finished: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }),
    };

    tokio::spawn(playback_loop(job, handle.clone()));
    handle
}

enum Fill {
    Frame(BytesMut),
    Ended,
    Failed(String),
}

struct FrameReader {
    stream: ByteSource,
    pending: BytesMut,
    skip_bytes: u64,
    stream_done: bool,
    pulled: Arc<AtomicU64>,
}

impl FrameReader {
    fn ingest(&mut self, chunk: Bytes) {
        self.pulled.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        let skip = (self.skip_bytes as usize).min(chunk.len());
        self.skip_bytes -= skip as u64;
        self.pending.extend_from_slice(&chunk[skip..]);
    }

    async fn next_frame(&mut self) -> Fill {
        while self.pending.len() < FRAME_SIZE_BYTES && !self.stream_done {
            match self.stream.next().await {
                Some(Ok(chunk)) => self.ingest(chunk),
                Some(Err(e)) => return Fill::Failed(e.to_string()),
                None => self.stream_done = true,
            }
        }

        if self.pending.len() >= FRAME_SIZE_BYTES {
            Fill::Frame(self.pending.split_to(FRAME_SIZE_BYTES))
        } else if !self.pending.is_empty() {
            // Pad the tail of the stream out to a whole frame of silence.
            let mut frame = self.pending.split();
            frame.resize(FRAME_SIZE_BYTES, 0);
            Fill::Frame(frame)
        } else {
            Fill::Ended
        }
    }
}

/// Byte offset for `ms`, aligned to a whole stereo sample.
fn pcm_offset(ms: u64) -> u64 {
    let bytes = ms * BYTES_PER_MS;
    bytes - bytes % 4
}

/// Decodes an s16le frame and applies `volume` (percent).
pub fn apply_volume(frame: &[u8], volume: u16) -> Vec<i16> {
    let mut pcm = vec![0i16; frame.len() / 2];
    LittleEndian::read_i16_into(&frame[..pcm.len() * 2], &mut pcm);

    if volume != 100 {
        let gain = volume as f32 / 100.0;
        for sample in &mut pcm {
            *sample = (*sample as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }
    }
    pcm
}

async fn playback_loop(job: TrackJob, handle: TrackHandle) {
    let TrackJob {
        tenant,
        track_id,
        stream,
        seek_ms,
        volume: _,
        sink,
        events,
        pulled,
    } = job;
    let shared = handle.shared.clone();
    let cancel = shared.cancel.clone();
    let emit = |kind: SessionEventKind| {
        let _ = events.send(NodeEvent::Payload(SessionEvent {
            tenant: tenant.clone(),
            kind,
        }));
    };

    let mut reader = FrameReader {
        stream,
        pending: BytesMut::with_capacity(FRAME_SIZE_BYTES * 2),
        skip_bytes: pcm_offset(seek_ms),
        stream_done: false,
        pulled,
    };
    let mut paused_rx = shared.paused.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_DURATION_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut frames: u64 = 0;
    let mut position_ms = seek_ms;

    debug!("[{}] playing {} from {}ms", tenant, track_id, seek_ms);

    let reason = loop {
        if cancel.is_cancelled() {
            break EndCode::from_u8(shared.end_code.load(Ordering::Acquire)).reason();
        }

        if *paused_rx.borrow_and_update() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => continue,
                changed = paused_rx.changed() => {
                    if changed.is_err() {
                        break TrackEndReason::Stopped;
                    }
                    ticker.reset();
                    continue;
                }
            }
        }

        let target = shared.seek_to.swap(NO_SEEK, Ordering::AcqRel);
        if target != NO_SEEK && target > position_ms {
            reader.skip_bytes += pcm_offset(target - position_ms);
            position_ms = target;
        }

        let fill = tokio::select! {
            biased;
            _ = cancel.cancelled() => continue,
            fill = reader.next_frame() => fill,
        };
        shared
            .buffered
            .store(reader.pending.len() as u64, Ordering::Release);

        let frame = match fill {
            Fill::Frame(frame) => frame,
            Fill::Ended => break TrackEndReason::Finished,
            Fill::Failed(message) => {
                warn!("[{}] stream for {} failed: {}", tenant, track_id, message);
                emit(SessionEventKind::Error {
                    track_id: Some(track_id.clone()),
                    message,
                });
                break TrackEndReason::LoadFailed;
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => continue,
            _ = ticker.tick() => {}
        }

        let pcm = apply_volume(&frame, shared.volume.load(Ordering::Acquire));
        if let Err(e) = sink.lock().await.send_frame(&pcm).await {
            warn!("[{}] sink rejected a frame of {}: {}", tenant, track_id, e);
            emit(SessionEventKind::Error {
                track_id: Some(track_id.clone()),
                message: e.to_string(),
            });
            break TrackEndReason::LoadFailed;
        }

        frames += 1;
        position_ms += FRAME_DURATION_MS;
        shared.position_ms.store(position_ms, Ordering::Release);

        if frames == 1 {
            emit(SessionEventKind::TrackStart {
                track_id: track_id.clone(),
            });
        }
        if frames % PROGRESS_EVERY_FRAMES == 0 {
            emit(SessionEventKind::Progress {
                track_id: track_id.clone(),
                elapsed_ms: frames * FRAME_DURATION_MS,
                position_ms,
            });
        }
    };

    shared.buffered.store(0, Ordering::Release);
    shared.finished.store(true, Ordering::Release);
    debug!("[{}] {} ended: {:?}", tenant, track_id, reason);

    emit(SessionEventKind::TrackEnd {
        track_id,
        reason,
        elapsed_ms: frames * FRAME_DURATION_MS,
    });
}

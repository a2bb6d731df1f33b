use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    common::{
        PlayerError, PlayerResult,
        types::{ChannelId, NodeId},
    },
    player::{
        events::{PlayerEvent, SkipReason},
        session::{Session, SessionInner},
        state::{Bitrate, MAX_VOLUME, PlaybackStatus},
    },
    protocol::{
        messages::{ControlMessage, EqBand, PlayRequest, SessionEventKind, TrackEndReason},
        tracks::{QueryType, Track},
    },
    sources::ByteSource,
};

#[derive(Debug, Clone, Default)]
pub struct PlayOptions {
    /// Append instead of playing now. Defaults to "a track is current".
    pub queue: Option<bool>,
    pub seek_ms: u64,
    /// Replays of the current track (seeks) do not announce `PlayerStart`.
    pub transition: bool,
}

#[derive(Debug, Clone)]
pub enum PlayOutcome {
    Queued(Track),
    Started(Track),
    /// Empty queue with `skip_on_empty`.
    Nothing,
    /// Every candidate failed to resolve and the queue ran dry, or the
    /// attempt limit was reached.
    Exhausted,
}

impl PlayOutcome {
    pub fn track(&self) -> Option<&Track> {
        match self {
            PlayOutcome::Queued(t) | PlayOutcome::Started(t) => Some(t),
            PlayOutcome::Nothing | PlayOutcome::Exhausted => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaveReason {
    Stop,
    Empty,
}

impl std::fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaveReason::Stop => write!(f, "stop"),
            LeaveReason::Empty => write!(f, "empty queue"),
        }
    }
}

impl Session {
    /// Plays `track`, or the next queued track when `None`.
    pub async fn play(
        self: &Arc<Self>,
        track: Option<Track>,
        opts: PlayOptions,
    ) -> PlayerResult<PlayOutcome> {
        let _serial = self.play_lock.lock().await;
        let config = &self.ctx.config;

        let mut candidate = {
            let mut inner = self.inner.lock().await;
            if inner.destroyed {
                return Err(PlayerError::NodeUnavailable(self.tenant().to_string()));
            }
            let queue = opts.queue.unwrap_or(inner.current.is_some());
            match track {
                Some(track) if queue => {
                    inner.queue.add(track.clone())?;
                    inner.cancel_leave_timer();
                    drop(inner);
                    self.ctx.emit(PlayerEvent::AudioTrackAdd {
                        tenant: self.tenant().clone(),
                        track: track.clone(),
                    });
                    return Ok(PlayOutcome::Queued(track));
                }
                Some(track) => track,
                None => match inner.queue.dispatch() {
                    Some(track) => track,
                    None if config.skip_on_empty => return Ok(PlayOutcome::Nothing),
                    None => return Err(PlayerError::NoPlayableTrack),
                },
            }
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let reason = match self.open_stream(&candidate).await {
                Ok(stream) => {
                    self.start(&candidate, stream, &opts).await?;
                    return Ok(PlayOutcome::Started(candidate));
                }
                Err(reason) => reason,
            };

            warn!(
                "[{}] could not extract stream for {}: {}",
                self.tenant(),
                candidate.title,
                reason
            );
            let err = PlayerError::StreamResolutionFailed {
                title: candidate.title.clone(),
                reason: Some(reason),
            };
            if !config.skip_on_no_stream {
                return Err(err);
            }

            self.ctx.emit(PlayerEvent::PlayerSkip {
                tenant: self.tenant().clone(),
                track: candidate.clone(),
                reason: SkipReason::NoStream,
            });
            self.ctx.emit(PlayerEvent::PlayerError {
                tenant: self.tenant().clone(),
                track: Some(candidate.clone()),
                message: err.to_string(),
            });

            if attempts >= config.max_resolution_attempts {
                warn!(
                    "[{}] giving up after {} failed stream resolutions",
                    self.tenant(),
                    attempts
                );
                return Ok(PlayOutcome::Exhausted);
            }

            let next = self.inner.lock().await.queue.dispatch();
            match next {
                Some(track) => candidate = track,
                None => {
                    self.on_queue_drained().await;
                    return Ok(PlayOutcome::Exhausted);
                }
            }
        }
    }

    /// Pre-play hook first, then the extractor chain.
    async fn open_stream(&self, track: &Track) -> Result<ByteSource, String> {
        let query_type = track
            .query_type
            .unwrap_or_else(|| QueryType::resolve(&track.url));

        if let Some(hook) = self.hook() {
            match hook.before_stream(track, query_type).await {
                Ok(Some(stream)) => {
                    debug!("[{}] stream for {} supplied by hook", self.tenant(), track.title);
                    return Ok(stream);
                }
                Ok(None) => {}
                Err(e) => return Err(format!("pre-play hook failed: {e}")),
            }
        }

        match self
            .ctx
            .extractors
            .resolve_stream(track, &self.ctx.config.block_stream_from)
            .await
        {
            Ok(Some(resolved)) => Ok(resolved.stream),
            Ok(None) => Err("no extractor accepted the track".into()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn start(
        self: &Arc<Self>,
        track: &Track,
        stream: ByteSource,
        opts: &PlayOptions,
    ) -> PlayerResult<()> {
        let node = self.ensure_node().await?;

        // Resolution may have outlived a leave.
        let mut inner = self.inner.lock().await;
        if inner.destroyed {
            debug!("[{}] dropping stream of {}, session is gone", self.tenant(), track.title);
            return Err(PlayerError::NodeUnavailable(self.tenant().to_string()));
        }
        inner.state.begin(opts.seek_ms);
        inner.state.transitioning = opts.transition;
        inner.current = Some(track.clone());
        inner.cancel_leave_timer();

        let request = PlayRequest {
            tenant: self.tenant().clone(),
            track_id: segment_key(track.id(), inner.state.generation),
            title: track.title.clone(),
            stream,
            seek_ms: opts.seek_ms,
            filters: inner.filters.snapshot(inner.state.volume),
        };

        if let Err(e) = self.ctx.pool.send(node, ControlMessage::Play(request)) {
            inner.current = None;
            inner.state.reset();
            drop(inner);
            self.set_node(None);
            return Err(e);
        }

        info!(
            "[{}] playing {} on {} from {}ms",
            self.tenant(),
            track.title,
            node,
            opts.seek_ms
        );
        Ok(())
    }

    /// Returns the bound node, binding a fresh one if it was lost.
    pub(crate) async fn ensure_node(&self) -> PlayerResult<NodeId> {
        if let Some(node) = self.node() {
            if self.ctx.pool.contains(node) {
                return Ok(node);
            }
        }

        let node = self.ctx.pool.spawn().await?;

        // Bind under the lock so `shutdown` either sees the node or we see
        // `destroyed`.
        let inner = self.inner.lock().await;
        if inner.destroyed {
            return Err(PlayerError::NodeUnavailable(self.tenant().to_string()));
        }
        self.ctx.pool.bind(node)?;
        self.set_node(Some(node));

        if let Some(channel) = inner.channel {
            self.forward(ControlMessage::JoinChannel {
                tenant: self.tenant().clone(),
                channel,
                self_deaf: inner.self_deaf,
            });
        }
        if let Bitrate::Fixed(bitrate) = inner.bitrate {
            self.forward(ControlMessage::SetBitrate {
                tenant: self.tenant().clone(),
                bitrate,
            });
        }

        info!("[{}] bound to {}", self.tenant(), node);
        Ok(node)
    }

    /// Asks the node to join `channel`. The `Connection` event follows once
    /// the node reports it.
    pub async fn connect(&self, channel: ChannelId, self_deaf: bool) -> PlayerResult<NodeId> {
        let node = self.ensure_node().await?;
        {
            let mut inner = self.inner.lock().await;
            inner.channel = Some(channel);
            inner.self_deaf = self_deaf;
        }
        self.ctx.pool.send(
            node,
            ControlMessage::JoinChannel {
                tenant: self.tenant().clone(),
                channel,
                self_deaf,
            },
        )?;
        Ok(node)
    }

    pub async fn pause(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if !matches!(
            inner.state.status,
            PlaybackStatus::Playing | PlaybackStatus::Buffering
        ) {
            return false;
        }
        inner.state.status = PlaybackStatus::Paused;
        drop(inner);

        self.forward(ControlMessage::SetPaused {
            tenant: self.tenant().clone(),
            paused: true,
        });
        self.ctx.emit(PlayerEvent::PlayerPause {
            tenant: self.tenant().clone(),
        });
        true
    }

    pub async fn resume(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state.status != PlaybackStatus::Paused {
            return false;
        }
        inner.state.status = PlaybackStatus::Playing;
        inner.cancel_leave_timer();
        drop(inner);

        self.forward(ControlMessage::SetPaused {
            tenant: self.tenant().clone(),
            paused: false,
        });
        self.ctx.emit(PlayerEvent::PlayerResume {
            tenant: self.tenant().clone(),
        });
        true
    }

    pub async fn set_paused(&self, paused: bool) -> bool {
        if paused {
            self.pause().await
        } else {
            self.resume().await
        }
    }

    /// Clamps to 0..=1000 and caches the value for the next track.
    pub async fn set_volume(&self, volume: u16) -> u16 {
        let volume = volume.min(MAX_VOLUME);
        let old = {
            let mut inner = self.inner.lock().await;
            std::mem::replace(&mut inner.state.volume, volume)
        };

        self.forward(ControlMessage::SetVolume {
            tenant: self.tenant().clone(),
            volume,
        });
        self.ctx.emit(PlayerEvent::VolumeChange {
            tenant: self.tenant().clone(),
            old,
            new: volume,
        });
        volume
    }

    pub async fn set_bitrate(&self, bitrate: Bitrate) -> u32 {
        self.inner.lock().await.bitrate = bitrate;
        let bps = bitrate.resolve();
        self.forward(ControlMessage::SetBitrate {
            tenant: self.tenant().clone(),
            bitrate: bps,
        });
        bps
    }

    /// Replaces the filter tokens. Returns the playback rate derived from
    /// them.
    pub async fn set_filters(&self, filters: Vec<String>) -> f64 {
        let rate = {
            let mut inner = self.inner.lock().await;
            inner.filters.set_filters(filters.clone());
            inner.filters.playback_rate
        };
        self.forward(ControlMessage::SetFilters {
            tenant: self.tenant().clone(),
            filters,
        });
        rate
    }

    pub async fn set_playback_rate(&self, rate: f64) -> PlayerResult<()> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(PlayerError::InvalidArgument(format!(
                "playback rate must be positive, got {rate}"
            )));
        }
        self.inner.lock().await.filters.playback_rate = rate;
        Ok(())
    }

    pub async fn set_equalizer(&self, bands: Vec<EqBand>) {
        self.inner.lock().await.filters.equalizer = bands.clone();
        self.forward(ControlMessage::SetEqualizer {
            tenant: self.tenant().clone(),
            bands,
        });
    }

    pub async fn set_biquad(&self, biquad: Option<String>) {
        self.inner.lock().await.filters.biquad = biquad.clone();
        self.forward(ControlMessage::SetBiquad {
            tenant: self.tenant().clone(),
            biquad,
        });
    }

    pub async fn set_dsp(&self, enabled: bool) {
        self.inner.lock().await.filters.dsp = enabled;
        self.forward(ControlMessage::SetDsp {
            tenant: self.tenant().clone(),
            enabled,
        });
    }

    /// Ends the current track. The queue advances when the node reports the
    /// end. Returns whether a track was current.
    pub async fn skip(&self) -> bool {
        let current = {
            let mut inner = self.inner.lock().await;
            inner.state.transitioning = false;
            inner.current.is_some()
        };
        if current {
            self.forward(ControlMessage::SkipTrack {
                tenant: self.tenant().clone(),
            });
        }
        current
    }

    /// Clears queue and history and stops playback. `force` also releases
    /// the node; otherwise `leave_on_stop` schedules the session's removal.
    pub async fn stop(self: &Arc<Self>, force: bool) -> bool {
        let mut inner = self.inner.lock().await;
        inner.queue.clear();
        inner.history.clear();
        inner.current = None;
        inner.state.reset();

        let Some(node) = self.node() else {
            return false;
        };
        self.forward(ControlMessage::Stop {
            tenant: self.tenant().clone(),
        });

        if force {
            inner.cancel_leave_timer();
            inner.channel = None;
            self.ctx.pool.release(node, self.tenant());
            self.set_node(None);
            info!("[{}] stopped and released {}", self.tenant(), node);
        } else if self.ctx.config.leave_on_stop {
            self.schedule_leave(
                &mut inner,
                self.ctx.config.leave_on_stop_cooldown_ms,
                LeaveReason::Stop,
            );
        }
        true
    }

    /// Replays the current track from `position_ms`. `false` when nothing is
    /// current or the replay could not start.
    pub async fn seek(self: &Arc<Self>, position_ms: u64) -> PlayerResult<bool> {
        let Some(track) = self.current_track().await else {
            return Ok(false);
        };
        let outcome = self
            .play(
                Some(track),
                PlayOptions {
                    queue: Some(false),
                    seek_ms: position_ms,
                    transition: true,
                },
            )
            .await?;
        Ok(matches!(outcome, PlayOutcome::Started(_)))
    }

    fn schedule_leave(self: &Arc<Self>, inner: &mut SessionInner, delay_ms: u64, reason: LeaveReason) {
        inner.cancel_leave_timer();
        let token = CancellationToken::new();
        inner.leave_timer = Some(token.clone());

        debug!(
            "[{}] leaving in {}ms unless playback resumes ({})",
            self.tenant(),
            delay_ms,
            reason
        );
        let session = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                    if let Some(session) = session.upgrade() {
                        session.leave_when_idle(reason, &token).await;
                    }
                }
            }
        });
    }

    async fn leave_when_idle(&self, reason: LeaveReason, token: &CancellationToken) {
        {
            let inner = self.inner.lock().await;
            if token.is_cancelled() || !inner.queue.is_empty() || inner.state.status.is_active() {
                return;
            }
        }
        info!("[{}] leaving after {}", self.tenant(), reason);
        if let Some(registry) = self.registry.upgrade() {
            registry.destroy(self.tenant()).await;
        }
    }

    async fn on_queue_drained(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.current.is_some() {
            return;
        }
        if self.ctx.config.leave_on_empty {
            self.schedule_leave(
                &mut inner,
                self.ctx.config.leave_on_empty_cooldown_ms,
                LeaveReason::Empty,
            );
        }
        drop(inner);
        self.ctx.emit(PlayerEvent::EmptyQueue {
            tenant: self.tenant().clone(),
        });
    }

    /// Applies an event the bound node reported for this tenant.
    pub(crate) async fn handle_node_event(self: &Arc<Self>, kind: SessionEventKind) {
        match kind {
            SessionEventKind::TrackStart { track_id } => {
                let mut inner = self.inner.lock().await;
                let Some(track) = current_if(&inner, &track_id) else {
                    debug!("[{}] ignoring start of stale track {}", self.tenant(), track_id);
                    return;
                };
                if inner.state.status != PlaybackStatus::Paused {
                    inner.state.status = PlaybackStatus::Playing;
                }
                let announce = !inner.state.transitioning;
                inner.state.transitioning = false;
                drop(inner);

                if announce {
                    self.ctx.emit(PlayerEvent::PlayerStart {
                        tenant: self.tenant().clone(),
                        track,
                    });
                }
            }
            SessionEventKind::Progress {
                track_id,
                elapsed_ms,
                ..
            } => {
                let mut inner = self.inner.lock().await;
                if current_if(&inner, &track_id).is_some() {
                    inner.state.segment_elapsed_ms = elapsed_ms;
                }
            }
            SessionEventKind::TrackEnd {
                reason: TrackEndReason::Replaced,
                ..
            } => {}
            SessionEventKind::TrackEnd {
                track_id,
                reason,
                elapsed_ms,
            } => self.on_track_end(&track_id, reason, elapsed_ms).await,
            SessionEventKind::Error { track_id, message } => {
                let track = match &track_id {
                    Some(id) => current_if(&*self.inner.lock().await, id),
                    None => None,
                };
                warn!("[{}] node reported: {}", self.tenant(), message);
                let event = match track_id {
                    Some(_) => PlayerEvent::PlayerError {
                        tenant: self.tenant().clone(),
                        track,
                        message,
                    },
                    None => PlayerEvent::Error {
                        tenant: Some(self.tenant().clone()),
                        message,
                    },
                };
                self.ctx.emit(event);
            }
            SessionEventKind::Disconnected => {
                self.inner.lock().await.channel = None;
                self.ctx.emit(PlayerEvent::Disconnect {
                    tenant: self.tenant().clone(),
                });
            }
        }
    }

    async fn on_track_end(self: &Arc<Self>, track_id: &str, reason: TrackEndReason, elapsed_ms: u64) {
        let mut inner = self.inner.lock().await;
        let Some(track) = current_if(&inner, track_id) else {
            debug!("[{}] ignoring end of stale track {}", self.tenant(), track_id);
            return;
        };

        inner.state.segment_elapsed_ms = elapsed_ms;
        inner.state.finish_segment();
        inner.state.transitioning = false;
        inner.current = None;
        inner.history.push(track.clone());

        let advance = reason.may_start_next();
        let drained = advance && inner.queue.is_empty();
        if drained && self.ctx.config.leave_on_empty {
            self.schedule_leave(
                &mut inner,
                self.ctx.config.leave_on_empty_cooldown_ms,
                LeaveReason::Empty,
            );
        }
        drop(inner);

        let tenant = self.tenant().clone();
        self.ctx.emit(match reason {
            TrackEndReason::Skipped => PlayerEvent::PlayerSkip {
                tenant,
                track,
                reason: SkipReason::Manual,
            },
            TrackEndReason::LoadFailed => PlayerEvent::PlayerSkip {
                tenant,
                track,
                reason: SkipReason::LoadFailed,
            },
            _ => PlayerEvent::PlayerFinish { tenant, track },
        });

        if drained {
            self.ctx.emit(PlayerEvent::EmptyQueue {
                tenant: self.tenant().clone(),
            });
        } else if advance {
            let session = self.clone();
            tokio::spawn(async move {
                let opts = PlayOptions {
                    queue: Some(false),
                    ..Default::default()
                };
                if let Err(e) = session.play(None, opts).await {
                    warn!("[{}] could not advance the queue: {}", session.tenant(), e);
                    session.ctx.emit(PlayerEvent::Error {
                        tenant: Some(session.tenant().clone()),
                        message: e.to_string(),
                    });
                }
            });
        }
    }

    /// Drops the binding to a node that left the pool. The queue is kept;
    /// the next play binds a new node.
    pub(crate) async fn on_node_lost(&self, node: NodeId) -> bool {
        if self.node() != Some(node) {
            return false;
        }
        self.set_node(None);

        let mut inner = self.inner.lock().await;
        if let Some(track) = inner.current.take() {
            warn!("[{}] lost {} while playing {}", self.tenant(), node, track.title);
        }
        inner.state.reset();
        true
    }

    pub(crate) async fn on_connected(&self, node: NodeId, channel: ChannelId) {
        self.inner.lock().await.channel = Some(channel);
        info!("[{}] connected to channel {} via {}", self.tenant(), channel, node);
        self.ctx.emit(PlayerEvent::Connection {
            tenant: self.tenant().clone(),
            node,
            channel,
        });
    }

    /// Cancels timers and releases the node. Called once by the registry.
    pub(crate) async fn shutdown(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.destroyed = true;
            inner.cancel_leave_timer();
            inner.queue.clear();
            inner.current = None;
            inner.state.reset();
        }
        let node = self.node();
        self.set_node(None);
        if let Some(node) = node {
            self.ctx.pool.release(node, self.tenant());
        }
    }
}

/// Identifies one play request on the wire. A seek replays the same track
/// under a new key, so events of the replaced segment no longer match.
pub(crate) fn segment_key(track_id: &str, generation: u64) -> String {
    format!("{track_id}#{generation}")
}

fn current_if(inner: &SessionInner, key: &str) -> Option<Track> {
    inner
        .current
        .as_ref()
        .filter(|t| segment_key(t.id(), inner.state.generation) == key)
        .cloned()
}

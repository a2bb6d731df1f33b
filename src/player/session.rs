use std::{
    sync::{Arc, Weak},
    time::Instant,
};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    common::{
        PlayerError, PlayerResult,
        types::{ChannelId, NodeId, TenantId},
    },
    configs::PlayerConfig,
    monitoring::{SessionStats, Versions},
    player::{
        context::PlayerContext,
        registry::SessionRegistry,
        state::{Bitrate, FilterState, PlaybackState, PlaybackStatus},
        timing::{ProgressBarOptions, Timestamp, render_progress_bar},
    },
    protocol::{messages::ControlMessage, tracks::Track},
    queue::{History, TrackQueue},
    sources::PrePlayHook,
};

/// Mutable state of a session. Never held across collaborator calls.
pub(crate) struct SessionInner {
    pub queue: TrackQueue,
    pub history: History,
    pub state: PlaybackState,
    pub filters: FilterState,
    pub bitrate: Bitrate,
    pub current: Option<Track>,
    pub channel: Option<ChannelId>,
    pub self_deaf: bool,
    pub leave_timer: Option<CancellationToken>,
    pub destroyed: bool,
}

impl SessionInner {
    fn new(config: &PlayerConfig) -> Self {
        Self {
            queue: TrackQueue::new(config.strategy, config.max_size),
            history: History::new(config.max_history_size),
            state: PlaybackState::new(config.default_volume),
            filters: FilterState::default(),
            bitrate: Bitrate::Auto,
            current: None,
            channel: None,
            self_deaf: true,
            leave_timer: None,
            destroyed: false,
        }
    }

    pub fn cancel_leave_timer(&mut self) {
        if let Some(timer) = self.leave_timer.take() {
            timer.cancel();
        }
    }
}

/// One tenant's queue, playback state and node binding.
pub struct Session {
    tenant: TenantId,
    pub(crate) ctx: Arc<PlayerContext>,
    pub(crate) registry: Weak<SessionRegistry>,
    pub(crate) inner: Mutex<SessionInner>,
    /// Serializes play requests.
    pub(crate) play_lock: Mutex<()>,
    node: parking_lot::RwLock<Option<NodeId>>,
    hook: parking_lot::RwLock<Option<Arc<dyn PrePlayHook>>>,
    created_at: Instant,
}

impl Session {
    pub(crate) fn new(
        tenant: TenantId,
        node: NodeId,
        ctx: Arc<PlayerContext>,
        registry: Weak<SessionRegistry>,
    ) -> Self {
        let inner = SessionInner::new(&ctx.config);
        Self {
            tenant,
            ctx,
            registry,
            inner: Mutex::new(inner),
            play_lock: Mutex::new(()),
            node: parking_lot::RwLock::new(Some(node)),
            hook: parking_lot::RwLock::new(None),
            created_at: Instant::now(),
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.ctx.config
    }

    /// The node this session is bound to, if any.
    pub fn node(&self) -> Option<NodeId> {
        *self.node.read()
    }

    pub(crate) fn set_node(&self, node: Option<NodeId>) {
        *self.node.write() = node;
    }

    pub fn set_hook(&self, hook: Option<Arc<dyn PrePlayHook>>) {
        *self.hook.write() = hook;
    }

    pub(crate) fn hook(&self) -> Option<Arc<dyn PrePlayHook>> {
        self.hook.read().clone()
    }

    /// Sends `msg` to the bound node. Unbound sessions only keep the cached
    /// state; the next play re-applies it.
    pub(crate) fn forward(&self, msg: ControlMessage) -> bool {
        let Some(node) = self.node() else {
            debug!("[{}] no node bound, {} kept locally", self.tenant, msg.op());
            return false;
        };
        match self.ctx.pool.send(node, msg) {
            Ok(()) => true,
            Err(e) => {
                warn!("[{}] failed to reach {}: {}", self.tenant, node, e);
                false
            }
        }
    }

    pub async fn current_track(&self) -> Option<Track> {
        self.inner.lock().await.current.clone()
    }

    pub async fn status(&self) -> PlaybackStatus {
        self.inner.lock().await.state.status
    }

    /// Status without waiting for the session lock.
    pub fn try_status(&self) -> Option<PlaybackStatus> {
        self.inner.try_lock().ok().map(|inner| inner.state.status)
    }

    pub async fn is_playing(&self) -> bool {
        self.status().await == PlaybackStatus::Playing
    }

    pub async fn volume(&self) -> u16 {
        self.inner.lock().await.state.volume
    }

    pub async fn playback_state(&self) -> PlaybackState {
        self.inner.lock().await.state.clone()
    }

    pub async fn filters(&self) -> FilterState {
        self.inner.lock().await.filters.clone()
    }

    pub async fn channel(&self) -> Option<ChannelId> {
        self.inner.lock().await.channel
    }

    pub async fn tracks(&self) -> Vec<Track> {
        self.inner.lock().await.queue.to_vec()
    }

    pub async fn history(&self) -> Vec<Track> {
        self.inner.lock().await.history.iter().cloned().collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.queue.is_empty()
    }

    fn total_duration_of(&self, track: &Track) -> u64 {
        if self.ctx.config.prefer_bridged_metadata {
            track.bridged_duration_ms().unwrap_or(track.duration_ms)
        } else {
            track.duration_ms
        }
    }

    fn timestamp_of(&self, inner: &SessionInner, ignore_filters: bool) -> Option<Timestamp> {
        let track = inner.current.as_ref()?;
        Some(Timestamp::compute(
            inner.state.playback_time_ms(),
            self.total_duration_of(track),
            inner.filters.playback_rate,
            ignore_filters,
        ))
    }

    /// Accumulated progress plus the running segment, in milliseconds.
    pub async fn playback_time_ms(&self) -> u64 {
        self.inner.lock().await.state.playback_time_ms()
    }

    /// Duration of the current track, 0 when idle.
    pub async fn total_duration_ms(&self) -> u64 {
        let inner = self.inner.lock().await;
        inner
            .current
            .as_ref()
            .map(|t| self.total_duration_of(t))
            .unwrap_or(0)
    }

    pub async fn timestamp(&self, ignore_filters: bool) -> Option<Timestamp> {
        let inner = self.inner.lock().await;
        self.timestamp_of(&inner, ignore_filters)
    }

    /// Renders the current position. `Ok(None)` when nothing is playing.
    pub async fn progress_bar(&self, opts: &ProgressBarOptions) -> PlayerResult<Option<String>> {
        if opts.length == 0 {
            return Err(PlayerError::InvalidArgument(
                "progress bar length must be at least 1".into(),
            ));
        }
        match self.timestamp(false).await {
            Some(ts) => render_progress_bar(&ts, opts).map(Some),
            None => Ok(None),
        }
    }

    pub async fn stats(&self) -> SessionStats {
        let inner = self.inner.lock().await;
        SessionStats {
            tenant: self.tenant.clone(),
            tracks: inner.queue.len(),
            history: inner.history.len(),
            extractors: self.ctx.extractors.len(),
            volume: inner.state.volume,
            status: inner.state.status,
            current: inner.current.as_ref().map(|t| t.to_string()),
            progress: self.timestamp_of(&inner, false),
            node: self.node(),
            channel: inner.channel,
            uptime_ms: self.created_at.elapsed().as_millis() as u64,
            versions: Versions::current(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("tenant", &self.tenant)
            .field("node", &self.node())
            .finish_non_exhaustive()
    }
}

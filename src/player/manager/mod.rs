mod dispatch;

use std::{sync::Arc, time::Instant};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    common::{
        PlayerError, PlayerResult,
        types::{ChannelId, TenantId},
    },
    configs::{Config, NodeRuntimeKind, PlayerConfig},
    monitoring::{PlayerStats, collect_stats},
    node::{NodePool, NodeSpawner, SinkFactory, spawner_for},
    player::{
        context::PlayerContext,
        control::{PlayOptions, PlayOutcome},
        events::PlayerEvent,
        registry::SessionRegistry,
        session::Session,
    },
    protocol::tracks::{QueryType, Requester, Track},
    sources::{Extractor, ExtractorRegistry, SearchResult},
};

/// Entry point of the control plane: owns the node pool, the extractor
/// chain and every tenant session.
///
/// Must be created inside a tokio runtime; it spawns the task that routes
/// node events to sessions.
pub struct Player {
    ctx: Arc<PlayerContext>,
    registry: Arc<SessionRegistry>,
    dispatcher: CancellationToken,
    runtime: NodeRuntimeKind,
    started_at: Instant,
}

impl Player {
    pub fn new(config: &Config, spawner: Arc<dyn NodeSpawner>) -> PlayerResult<Arc<Self>> {
        config.validate()?;
        let pool = NodePool::new(&config.pool, spawner)?;
        let ctx = Arc::new(PlayerContext::new(
            config.player.clone(),
            pool.clone(),
            Arc::new(ExtractorRegistry::new()),
        ));
        let registry = SessionRegistry::new(ctx.clone());

        let dispatcher = CancellationToken::new();
        tokio::spawn(dispatch::run(
            pool.route(),
            registry.clone(),
            ctx.clone(),
            dispatcher.clone(),
        ));

        info!(
            "Player ready: up to {} node(s), {:?} runtime",
            pool.max_nodes(),
            config.pool.runtime
        );
        Ok(Arc::new(Self {
            ctx,
            registry,
            dispatcher,
            runtime: config.pool.runtime,
            started_at: Instant::now(),
        }))
    }

    /// Builds the spawner selected by `pool.runtime` around `sinks`.
    pub fn with_sinks(config: &Config, sinks: Arc<dyn SinkFactory>) -> PlayerResult<Arc<Self>> {
        Self::new(config, spawner_for(config.pool.runtime, sinks))
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.ctx.config
    }

    pub fn pool(&self) -> &Arc<NodePool> {
        &self.ctx.pool
    }

    pub fn extractors(&self) -> &Arc<ExtractorRegistry> {
        &self.ctx.extractors
    }

    /// Returns `false` if an extractor with the same identifier exists.
    pub fn register_extractor(&self, extractor: Arc<dyn Extractor>) -> bool {
        self.ctx.extractors.register(extractor)
    }

    /// Where this player's nodes run.
    pub fn runtime(&self) -> NodeRuntimeKind {
        self.runtime
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.ctx.events.subscribe()
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Asks the registered extractors, in order, for tracks matching
    /// `query`.
    pub async fn search(&self, query: &str, requested_by: Option<Requester>) -> SearchResult {
        let query_type = QueryType::resolve(query);
        let mut result = self.ctx.extractors.search(query, query_type).await;
        for track in result.tracks.iter_mut() {
            track.requested_by = requested_by.clone();
        }
        if let Some(playlist) = result.playlist.as_mut() {
            for track in playlist.tracks.iter_mut() {
                track.requested_by = requested_by.clone();
            }
        }
        result
    }

    pub async fn session(&self, tenant: impl Into<TenantId>) -> PlayerResult<Arc<Session>> {
        self.registry.get_or_create(&tenant.into()).await
    }

    pub fn resolve(&self, tenant: &str) -> Option<Arc<Session>> {
        self.registry.resolve(tenant)
    }

    /// Creates the tenant's session if needed and joins `channel`.
    pub async fn connect(
        &self,
        tenant: impl Into<TenantId>,
        channel: ChannelId,
        self_deaf: bool,
    ) -> PlayerResult<Arc<Session>> {
        let session = self.session(tenant).await?;
        session.connect(channel, self_deaf).await?;
        Ok(session)
    }

    pub async fn play(
        &self,
        tenant: impl Into<TenantId>,
        track: Track,
        opts: PlayOptions,
    ) -> PlayerResult<PlayOutcome> {
        let session = self.session(tenant).await?;
        session.play(Some(track), opts).await
    }

    /// Searches `query` and plays the first result. Playlist results queue
    /// the remaining tracks behind it.
    pub async fn play_query(
        &self,
        tenant: impl Into<TenantId>,
        query: &str,
        requested_by: Option<Requester>,
        opts: PlayOptions,
    ) -> PlayerResult<PlayOutcome> {
        let result = self.search(query, requested_by).await;
        let is_playlist = result.playlist.is_some();
        let mut tracks = result.tracks.into_iter();
        let Some(first) = tracks.next() else {
            return Err(PlayerError::NoPlayableTrack);
        };

        let session = self.session(tenant).await?;
        let outcome = session.play(Some(first), opts).await?;
        if is_playlist {
            session.add_many(tracks.collect()).await?;
        }
        Ok(outcome)
    }

    /// Destroys the tenant's session. Returns `false` if there was none.
    pub async fn leave(&self, tenant: &str) -> bool {
        self.registry.destroy(tenant).await
    }

    pub fn stats(&self) -> PlayerStats {
        collect_stats(self)
    }

    /// Destroys every session, stops event routing and terminates all
    /// nodes.
    pub async fn shutdown(&self) {
        for tenant in self.registry.tenants() {
            self.registry.destroy(&tenant).await;
        }
        self.dispatcher.cancel();
        self.ctx.pool.terminate(None);
        info!("Player shut down");
    }
}

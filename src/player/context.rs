use std::sync::Arc;

use crate::{
    configs::PlayerConfig,
    node::NodePool,
    player::events::{EventEmitter, PlayerEvent},
    sources::ExtractorRegistry,
};

/// Collaborators shared by every session of one player.
pub struct PlayerContext {
    pub config: PlayerConfig,
    pub pool: Arc<NodePool>,
    pub extractors: Arc<ExtractorRegistry>,
    pub events: EventEmitter,
}

impl PlayerContext {
    pub fn new(config: PlayerConfig, pool: Arc<NodePool>, extractors: Arc<ExtractorRegistry>) -> Self {
        Self {
            config,
            pool,
            extractors,
            events: EventEmitter::new(),
        }
    }

    pub fn emit(&self, event: PlayerEvent) {
        self.events.emit(event);
    }
}

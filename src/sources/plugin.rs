use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::{
    common::types::AnyResult,
    protocol::tracks::{Playlist, QueryType, Track},
};

/// 48 kHz stereo s16le PCM, chunked arbitrarily.
pub type ByteSource = BoxStream<'static, std::io::Result<Bytes>>;

/// Tracks found for a query, optionally grouped as a playlist.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub tracks: Vec<Track>,
    pub playlist: Option<Playlist>,
    /// Identifier of the extractor that produced the result.
    pub extractor: Option<String>,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Trait that all track backends must implement.
///
/// An extractor is asked, in registration order, whether it can handle a
/// query (`validate`), to turn it into tracks (`search`) and to open a
/// byte stream for a track it validated (`stream`).
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Unique identifier, e.g. `"local"`.
    fn identifier(&self) -> &str;

    async fn validate(&self, query: &str, query_type: QueryType) -> bool;

    async fn search(&self, query: &str, query_type: QueryType) -> AnyResult<SearchResult>;

    async fn stream(&self, track: &Track) -> AnyResult<ByteSource>;
}

/// Runs before the extractor chain for every stream a session needs.
///
/// Returning `Ok(Some(_))` short-circuits the chain. `Ok(None)` falls
/// through to the extractors. An error with no stream fails the track.
#[async_trait]
pub trait PrePlayHook: Send + Sync {
    async fn before_stream(&self, track: &Track, query_type: QueryType) -> AnyResult<Option<ByteSource>>;
}

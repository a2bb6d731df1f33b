use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{
    time_code::build_time_code,
    types::{AnyResult, UserId},
};

/// How a query string should be interpreted by extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum QueryType {
    #[default]
    Auto,
    AutoSearch,
    Arbitrary,
    File,
    Url,
}

impl QueryType {
    /// Best guess for a raw query.
    pub fn resolve(query: &str) -> Self {
        let query = query.trim();
        if query.starts_with("file://") || query.starts_with('/') {
            QueryType::File
        } else if query.starts_with("http://") || query.starts_with("https://") {
            QueryType::Url
        } else {
            QueryType::AutoSearch
        }
    }
}

/// The user who asked for a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub id: UserId,
    pub username: String,
}

/// Lazily fetches extra metadata for a track.
pub type MetadataResolver = Arc<dyn Fn() -> BoxFuture<'static, AnyResult<Option<Value>>> + Send + Sync>;

/// Fields used to build a [`Track`].
#[derive(Debug, Clone, Default)]
pub struct TrackInfo {
    pub title: String,
    /// Defaults to `"<title> by <author>"` when empty.
    pub description: String,
    pub author: String,
    pub url: String,
    pub thumbnail: String,
    pub duration_ms: u64,
    pub views: u64,
    pub live: bool,
    pub source: String,
    pub query_type: Option<QueryType>,
    pub extractor: Option<String>,
    pub requested_by: Option<Requester>,
    pub metadata: Option<Value>,
}

/// A playable item. Identity and descriptive fields never change after
/// creation; only the attached metadata does.
///
/// Cloning shares identity and metadata. Use [`Track::duplicate`] for an
/// independent copy.
#[derive(Clone)]
pub struct Track {
    id: String,
    pub title: String,
    pub description: String,
    pub author: String,
    pub url: String,
    pub thumbnail: String,
    pub duration_ms: u64,
    pub views: u64,
    pub live: bool,
    pub source: String,
    pub query_type: Option<QueryType>,
    pub extractor: Option<String>,
    pub requested_by: Option<Requester>,
    metadata: Arc<RwLock<Option<Value>>>,
    resolver: Option<MetadataResolver>,
}

impl Track {
    pub fn new(info: TrackInfo) -> Self {
        let description = if info.description.is_empty() {
            format!("{} by {}", info.title, info.author)
        } else {
            info.description
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: info.title,
            description,
            author: info.author,
            url: info.url,
            thumbnail: info.thumbnail,
            duration_ms: info.duration_ms,
            views: info.views,
            live: info.live,
            source: info.source,
            query_type: info.query_type,
            extractor: info.extractor,
            requested_by: info.requested_by,
            metadata: Arc::new(RwLock::new(info.metadata)),
            resolver: None,
        }
    }

    pub fn with_metadata_resolver(mut self, resolver: MetadataResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Copy of this track with a fresh identity and its own metadata slot.
    pub fn duplicate(&self) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: Arc::new(RwLock::new(self.metadata())),
            ..self.clone()
        }
    }

    pub fn metadata(&self) -> Option<Value> {
        self.metadata.read().clone()
    }

    pub fn set_metadata(&self, metadata: Option<Value>) {
        *self.metadata.write() = metadata;
    }

    /// Runs the lazy resolver, if any, and stores its result.
    pub async fn request_metadata(&self) -> AnyResult<Option<Value>> {
        let Some(resolver) = self.resolver.clone() else {
            return Ok(self.metadata());
        };
        let resolved = resolver().await?;
        self.set_metadata(resolved.clone());
        Ok(resolved)
    }

    /// Duration of the bridged source (`metadata.bridge.duration`), if any.
    pub fn bridged_duration_ms(&self) -> Option<u64> {
        self.metadata
            .read()
            .as_ref()?
            .get("bridge")?
            .get("duration")?
            .as_u64()
    }

    /// Duration as a time code, e.g. `03:25`.
    pub fn duration_label(&self) -> String {
        build_time_code(self.duration_ms)
    }

    pub fn to_hyperlink(&self) -> String {
        format!("[{}]({})", self.title, self.url)
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Track {}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} by {}", self.title, self.author)
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("author", &self.author)
            .field("url", &self.url)
            .field("duration_ms", &self.duration_ms)
            .field("source", &self.source)
            .field("extractor", &self.extractor)
            .finish_non_exhaustive()
    }
}

/// A named collection of tracks returned by a search.
#[derive(Debug, Clone)]
pub struct Playlist {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail: String,
    pub kind: PlaylistKind,
    pub source: String,
    pub author: Option<PlaylistAuthor>,
    pub url: String,
    pub tracks: Vec<Track>,
}

impl Playlist {
    pub fn duration_ms(&self) -> u64 {
        self.tracks.iter().map(|t| t.duration_ms).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistKind {
    #[default]
    Playlist,
    Album,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistAuthor {
    pub name: String,
    pub url: String,
}

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    common::types::AnyResult,
    protocol::tracks::{QueryType, Track},
    sources::plugin::{ByteSource, Extractor, SearchResult},
};

pub type BoxedExtractor = Arc<dyn Extractor>;

/// A stream opened by one of the registered extractors.
pub struct ResolvedStream {
    pub extractor: String,
    pub stream: ByteSource,
}

/// Ordered set of extractors shared by every session of a player.
#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: RwLock<Vec<BoxedExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an extractor. Returns `false` if one with the same identifier
    /// is already registered.
    pub fn register(&self, extractor: BoxedExtractor) -> bool {
        let mut extractors = self.extractors.write();
        if extractors
            .iter()
            .any(|e| e.identifier() == extractor.identifier())
        {
            warn!(
                "Extractor {} is already registered, ignoring",
                extractor.identifier()
            );
            return false;
        }
        tracing::info!("Loaded extractor: {}", extractor.identifier());
        extractors.push(extractor);
        true
    }

    pub fn unregister(&self, identifier: &str) -> bool {
        let mut extractors = self.extractors.write();
        let before = extractors.len();
        extractors.retain(|e| e.identifier() != identifier);
        extractors.len() != before
    }

    pub fn get(&self, identifier: &str) -> Option<BoxedExtractor> {
        self.extractors
            .read()
            .iter()
            .find(|e| e.identifier() == identifier)
            .cloned()
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.extractors
            .read()
            .iter()
            .map(|e| e.identifier().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.extractors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.read().is_empty()
    }

    fn snapshot(&self) -> Vec<BoxedExtractor> {
        self.extractors.read().clone()
    }

    /// First extractor that validates the query and returns tracks wins.
    pub async fn search(&self, query: &str, query_type: QueryType) -> SearchResult {
        for extractor in self.snapshot() {
            if !extractor.validate(query, query_type).await {
                continue;
            }
            match extractor.search(query, query_type).await {
                Ok(mut result) if !result.is_empty() => {
                    result.extractor = Some(extractor.identifier().to_string());
                    return result;
                }
                Ok(_) => {
                    debug!("{} returned no tracks for {}", extractor.identifier(), query);
                }
                Err(e) => {
                    warn!("{} failed to search {}: {}", extractor.identifier(), query, e);
                }
            }
        }
        SearchResult::default()
    }

    /// Opens a byte stream for `track`, trying extractors in registration
    /// order and skipping the `blocked` identifiers. Errors fall through to
    /// the next extractor; the last one is returned if nothing succeeds.
    pub async fn resolve_stream(
        &self,
        track: &Track,
        blocked: &[String],
    ) -> AnyResult<Option<ResolvedStream>> {
        let query_type = track
            .query_type
            .unwrap_or_else(|| QueryType::resolve(&track.url));
        let mut last_error = None;

        for extractor in self.snapshot() {
            let id = extractor.identifier();
            if blocked.iter().any(|b| b == id) {
                debug!("Skipping blocked extractor {} for {}", id, track.title);
                continue;
            }
            if !extractor.validate(&track.url, query_type).await {
                continue;
            }
            match extractor.stream(track).await {
                Ok(stream) => {
                    debug!("Stream for {} opened by {}", track.title, id);
                    return Ok(Some(ResolvedStream {
                        extractor: id.to_string(),
                        stream,
                    }));
                }
                Err(e) => {
                    warn!("{} could not stream {}: {}", id, track.title, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

use std::path::Path;

use async_trait::async_trait;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::{
    common::types::AnyResult,
    node::constants::BYTES_PER_MS,
    protocol::tracks::{QueryType, Track, TrackInfo},
    sources::plugin::{ByteSource, Extractor, SearchResult},
};

const PCM_EXTENSIONS: &[&str] = &["pcm", "raw", "s16le"];

/// Raw 48 kHz stereo s16le files on the local disk.
pub struct LocalExtractor;

impl LocalExtractor {
    pub fn new() -> Self {
        Self
    }

    fn path_of(query: &str) -> &str {
        query.trim().trim_start_matches("file://")
    }

    fn is_pcm(path: &str) -> bool {
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| PCM_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }
}

impl Default for LocalExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for LocalExtractor {
    fn identifier(&self) -> &str {
        "local"
    }

    async fn validate(&self, query: &str, query_type: QueryType) -> bool {
        if !matches!(query_type, QueryType::File | QueryType::Auto) {
            return false;
        }
        let path = Self::path_of(query);
        Self::is_pcm(path) && tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn search(&self, query: &str, _query_type: QueryType) -> AnyResult<SearchResult> {
        let path = Self::path_of(query);
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(format!("{} is not a file", path).into());
        }

        let title = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
            .to_string();

        debug!("Probed local file {} ({} bytes)", path, meta.len());

        Ok(SearchResult {
            tracks: vec![Track::new(TrackInfo {
                title,
                author: "Unknown".into(),
                url: format!("file://{}", path),
                duration_ms: meta.len() / BYTES_PER_MS,
                source: "local".into(),
                query_type: Some(QueryType::File),
                extractor: Some(self.identifier().to_string()),
                ..Default::default()
            })],
            ..Default::default()
        })
    }

    async fn stream(&self, track: &Track) -> AnyResult<ByteSource> {
        let file = tokio::fs::File::open(Self::path_of(&track.url)).await?;
        Ok(Box::pin(ReaderStream::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn test_local_file_search_and_stream() {
        let path = std::env::temp_dir().join(format!("rustaplay-{}.pcm", uuid::Uuid::new_v4()));
        std::fs::write(&path, vec![1u8; 192 * 1_500]).unwrap();
        let query = format!("file://{}", path.display());

        let extractor = LocalExtractor::new();
        assert!(extractor.validate(&query, QueryType::File).await);
        assert!(!extractor.validate(&query, QueryType::Url).await);

        let result = extractor.search(&query, QueryType::File).await.unwrap();
        let track = &result.tracks[0];
        assert_eq!(track.duration_ms, 1_500);
        assert_eq!(track.extractor.as_deref(), Some("local"));

        let mut stream = extractor.stream(track).await.unwrap();
        let mut total = 0;
        while let Some(chunk) = stream.next().await {
            total += chunk.unwrap().len();
        }
        assert_eq!(total, 192 * 1_500);

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_rejects_other_extensions() {
        let extractor = LocalExtractor::new();
        assert!(!extractor.validate("file:///etc/hostname", QueryType::File).await);
    }
}

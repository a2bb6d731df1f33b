pub mod local;
pub mod manager;
pub mod plugin;

pub use local::LocalExtractor;
pub use manager::{ExtractorRegistry, ResolvedStream};
pub use plugin::{ByteSource, Extractor, PrePlayHook, SearchResult};

pub mod cache;
pub mod checksum;
pub mod fetcher;
pub mod source;

pub use cache::{ArtifactCache, CacheEntry};
pub use checksum::{Checksum, ChecksumAlgo};
pub use fetcher::ArtifactFetcher;
pub use source::{ArtifactSource, FileSource, HttpSource, MemorySource, SourceRouter};

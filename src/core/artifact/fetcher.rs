use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use super::cache::{ArtifactCache, CacheEntry};
use super::checksum::Checksum;
use super::source::ArtifactSource;
use crate::core::error::FetchError;
use crate::core::template::PlannedArtifact;

type SharedFetch = Shared<BoxFuture<'static, Result<CacheEntry, FetchError>>>;

/// Resolves planned artifacts to verified cache entries.
///
/// At most one download runs per dependency key; concurrent callers for the
/// same key await the same shared future.
pub struct ArtifactFetcher {
    cache: Arc<ArtifactCache>,
    source: Arc<dyn ArtifactSource>,
    in_flight: Arc<Mutex<HashMap<String, SharedFetch>>>,
    max_parallel: usize,
}

impl ArtifactFetcher {
    pub fn new(cache: Arc<ArtifactCache>, source: Arc<dyn ArtifactSource>) -> Self {
        Self {
            cache,
            source,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            max_parallel: 8,
        }
    }

    pub fn with_max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n.max(1);
        self
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    #[instrument(skip(self, artifact), fields(key = %artifact.key))]
    pub async fn resolve(&self, artifact: &PlannedArtifact) -> Result<CacheEntry, FetchError> {
        if let Some(entry) = self
            .cache
            .lookup_verified(&artifact.key, artifact.checksum.as_ref())
            .await
        {
            debug!("Cache hit for {}", artifact.key);
            return Ok(entry);
        }

        let fetch = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match in_flight.get(&artifact.key) {
                Some(existing) => {
                    debug!("Joining in-flight fetch for {}", artifact.key);
                    existing.clone()
                }
                None => {
                    let fetch = self.spawn_fetch(artifact.clone());
                    in_flight.insert(artifact.key.clone(), fetch.clone());
                    fetch
                }
            }
        };
        fetch.await
    }

    fn spawn_fetch(&self, artifact: PlannedArtifact) -> SharedFetch {
        let cache = Arc::clone(&self.cache);
        let source = Arc::clone(&self.source);
        let in_flight = Arc::clone(&self.in_flight);

        async move {
            let result = download_and_store(&cache, source.as_ref(), &artifact).await;
            in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&artifact.key);
            result
        }
        .boxed()
        .shared()
    }

    /// Resolve many artifacts with bounded concurrency. Entries come back in
    /// input order; the first failure (in input order) is returned.
    pub async fn resolve_all(
        &self,
        artifacts: &[PlannedArtifact],
    ) -> Result<Vec<CacheEntry>, FetchError> {
        let mut results: Vec<(usize, Result<CacheEntry, FetchError>)> =
            stream::iter(artifacts.iter().cloned().enumerate())
                .map(|(index, artifact)| async move { (index, self.resolve(&artifact).await) })
                .buffer_unordered(self.max_parallel)
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

async fn download_and_store(
    cache: &ArtifactCache,
    source: &dyn ArtifactSource,
    artifact: &PlannedArtifact,
) -> Result<CacheEntry, FetchError> {
    // A fetch that finished between our miss and this one already stored it.
    if let Some(entry) = cache
        .lookup_verified(&artifact.key, artifact.checksum.as_ref())
        .await
    {
        return Ok(entry);
    }

    let url = artifact.locator.url();
    info!("Fetching {} {} from {}", artifact.name, artifact.version, url);
    let bytes = source.fetch(&url).await?;

    let recorded = match &artifact.checksum {
        Some(expected) => {
            if !expected.verify(&bytes) {
                let actual = Checksum::compute(expected.algo, &bytes);
                warn!(
                    "Checksum mismatch for {}: expected {}, got {}",
                    artifact.key, expected, actual
                );
                return Err(FetchError::ChecksumMismatch {
                    dependency: format!("{}@{}", artifact.name, artifact.version),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
            expected.clone()
        }
        None => Checksum::sha256(&bytes),
    };

    cache
        .store(
            &artifact.key,
            &artifact.name,
            &artifact.version,
            &url,
            Some(recorded),
            &bytes,
        )
        .await
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::core::artifact::MemorySource;
    use crate::core::template::ArtifactLocator;

    fn planned(name: &str, url: &str, checksum: Option<Checksum>) -> PlannedArtifact {
        PlannedArtifact::new(
            name,
            "1.0",
            ArtifactLocator::Url {
                url: url.to_string(),
            },
            checksum,
            PathBuf::from(format!("plugins/{}-1.0.jar", name)),
        )
    }

    #[tokio::test]
    async fn concurrent_resolutions_share_one_download() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::open(dir.path()).await.unwrap());
        let source = Arc::new(MemorySource::new().with_delay(Duration::from_millis(50)));
        source.insert("https://cdn.test/a.jar", b"plugin a".to_vec());
        let fetcher = ArtifactFetcher::new(cache, source.clone());

        let artifact = planned("a", "https://cdn.test/a.jar", None);
        let (x, y, z) = tokio::join!(
            fetcher.resolve(&artifact),
            fetcher.resolve(&artifact),
            fetcher.resolve(&artifact)
        );
        assert_eq!(x.unwrap().digest, y.unwrap().digest);
        assert!(z.is_ok());
        assert_eq!(source.request_count("https://cdn.test/a.jar"), 1);
    }

    #[tokio::test]
    async fn second_resolve_is_a_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::open(dir.path()).await.unwrap());
        let source = Arc::new(MemorySource::new());
        source.insert("https://cdn.test/a.jar", b"plugin a".to_vec());
        let fetcher = ArtifactFetcher::new(cache, source.clone());

        let artifact = planned("a", "https://cdn.test/a.jar", None);
        let first = fetcher.resolve(&artifact).await.unwrap();
        let second = fetcher.resolve(&artifact).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.request_count("https://cdn.test/a.jar"), 1);
        assert_eq!(first.checksum, Some(Checksum::sha256(b"plugin a")));
    }

    #[tokio::test]
    async fn cached_blob_is_checked_against_the_newly_declared_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::open(dir.path()).await.unwrap());
        let source = Arc::new(MemorySource::new());
        source.insert("https://cdn.test/a.jar", b"plugin a".to_vec());
        let fetcher = ArtifactFetcher::new(cache, source.clone());

        fetcher
            .resolve(&planned("a", "https://cdn.test/a.jar", None))
            .await
            .unwrap();

        let pinned = planned(
            "a",
            "https://cdn.test/a.jar",
            Some(Checksum::sha256(b"some other bytes")),
        );
        let err = fetcher.resolve(&pinned).await.unwrap_err();
        assert!(matches!(err, FetchError::ChecksumMismatch { .. }));
        assert_eq!(source.request_count("https://cdn.test/a.jar"), 2);

        let matching = planned(
            "a",
            "https://cdn.test/a.jar",
            Some(Checksum::sha256(b"plugin a")),
        );
        let entry = fetcher.resolve(&matching).await.unwrap();
        assert_eq!(entry.digest, Checksum::sha256(b"plugin a").hex);
    }

    #[tokio::test]
    async fn resolve_all_can_run_on_a_spawned_task() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::open(dir.path()).await.unwrap());
        let source = Arc::new(MemorySource::new());
        source.insert("https://cdn.test/a.jar", b"plugin a".to_vec());
        let fetcher = Arc::new(ArtifactFetcher::new(cache, source));

        let artifacts = vec![planned("a", "https://cdn.test/a.jar", None)];
        let task = tokio::spawn({
            let fetcher = Arc::clone(&fetcher);
            async move { fetcher.resolve_all(&artifacts).await }
        });
        assert_eq!(task.await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolve_all_keeps_input_order_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::open(dir.path()).await.unwrap());
        let source = Arc::new(MemorySource::new());
        source.insert("https://cdn.test/a.jar", b"a".to_vec());
        source.insert("https://cdn.test/b.jar", b"b".to_vec());
        let fetcher = ArtifactFetcher::new(cache, source).with_max_parallel(2);

        let entries = fetcher
            .resolve_all(&[
                planned("b", "https://cdn.test/b.jar", None),
                planned("a", "https://cdn.test/a.jar", None),
            ])
            .await
            .unwrap();
        assert_eq!(entries[0].name, "b");
        assert_eq!(entries[1].name, "a");

        let err = fetcher
            .resolve_all(&[planned("missing", "https://cdn.test/missing.jar", None)])
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }
}

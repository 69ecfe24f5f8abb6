use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::core::error::FetchError;

/// Something that turns a URL into bytes. The fetcher depends only on this.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

// ── HTTP ────────────────────────────────────────────────

pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactSource for HttpSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let network = |e: reqwest::Error| FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(network)?;
        debug!("Downloaded {} ({} bytes)", url, bytes.len());
        Ok(bytes.to_vec())
    }
}

// ── Local files ─────────────────────────────────────────

/// `file://` sources, for artifacts kept next to the workspace.
pub struct FileSource;

#[async_trait]
impl ArtifactSource for FileSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let path = url
            .strip_prefix("file://")
            .map(PathBuf::from)
            .ok_or_else(|| FetchError::UnsupportedSource {
                url: url.to_string(),
            })?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| FetchError::io(&path, &e))
    }
}

// ── Routing ─────────────────────────────────────────────

/// Chooses a source by URL scheme.
pub struct SourceRouter {
    http: HttpSource,
    file: FileSource,
}

impl SourceRouter {
    pub fn new(client: Client) -> Self {
        Self {
            http: HttpSource::new(client),
            file: FileSource,
        }
    }
}

#[async_trait]
impl ArtifactSource for SourceRouter {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if url.starts_with("https://") || url.starts_with("http://") {
            self.http.fetch(url).await
        } else if url.starts_with("file://") {
            self.file.fetch(url).await
        } else {
            Err(FetchError::UnsupportedSource {
                url: url.to_string(),
            })
        }
    }
}

// ── In-memory double ────────────────────────────────────

/// Serves canned bytes and counts requests.
#[derive(Default)]
pub struct MemorySource {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps for `delay` first, to widen race windows in tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn insert(&self, url: &str, bytes: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.to_string(), bytes.into());
    }

    /// How many times `url` was requested.
    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ArtifactSource for MemorySource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        *self
            .requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(url.to_string())
            .or_default() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn router_rejects_unknown_scheme() {
        let router = SourceRouter::new(Client::new());
        let err = router.fetch("ftp://example.org/a.jar").await.unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedSource { .. }));
    }

    #[tokio::test]
    async fn router_reads_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.jar");
        std::fs::write(&path, b"jar bytes").unwrap();

        let router = SourceRouter::new(Client::new());
        let bytes = router
            .fetch(&format!("file://{}", path.display()))
            .await
            .unwrap();
        assert_eq!(bytes, b"jar bytes");
    }

    #[tokio::test]
    async fn memory_source_counts_requests() {
        let source = MemorySource::new();
        source.insert("mem://a", b"a".to_vec());
        source.fetch("mem://a").await.unwrap();
        assert!(source.fetch("mem://missing").await.is_err());
        assert_eq!(source.request_count("mem://a"), 1);
        assert_eq!(source.request_count("mem://missing"), 1);
    }
}

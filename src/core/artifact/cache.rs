use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::checksum::Checksum;
use crate::core::error::FetchError;

const INDEX_FILE: &str = "index.json";

/// One stored artifact. Blobs are addressed by SHA-256, so byte-identical
/// artifacts from different templates share one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub name: String,
    pub version: String,
    /// SHA-256 of the blob.
    pub digest: String,
    pub size: u64,
    /// Checksum declared by the template, if any.
    pub checksum: Option<Checksum>,
    pub source: String,
    pub stored_at: DateTime<Utc>,
}

/// Content-addressed artifact store.
///
/// Layout:
/// - `<root>/blobs/sha256/<digest>`
/// - `<root>/index.json` (dependency key → entry)
/// - `<root>/tmp/` (staging slots, renamed into `blobs/` on success)
pub struct ArtifactCache {
    root: PathBuf,
    index: Mutex<BTreeMap<String, CacheEntry>>,
}

impl ArtifactCache {
    pub async fn open(root: &Path) -> Result<Self, FetchError> {
        for dir in [root.join("blobs").join("sha256"), root.join("tmp")] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| FetchError::io(&dir, &e))?;
        }

        let index_path = root.join(INDEX_FILE);
        let index = match tokio::fs::read_to_string(&index_path).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(index) => index,
                Err(e) => {
                    warn!("Corrupt cache index at {:?}, starting empty: {}", index_path, e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(FetchError::io(&index_path, &e)),
        };

        Ok(Self {
            root: root.to_path_buf(),
            index: Mutex::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self, digest: &str) -> PathBuf {
        self.root.join("blobs").join("sha256").join(digest)
    }

    /// Entry for `key` whose blob is present and still hashes to its digest.
    /// With `expected`, the blob must also match that checksum.
    pub async fn lookup_verified(
        &self,
        key: &str,
        expected: Option<&Checksum>,
    ) -> Option<CacheEntry> {
        let entry = self.index.lock().await.get(key).cloned()?;
        let bytes = tokio::fs::read(self.blob_path(&entry.digest)).await.ok()?;
        let sha = Checksum::sha256(&bytes);
        if sha.hex != entry.digest {
            warn!("Cached blob for '{}' no longer matches its digest", key);
            return None;
        }
        if let Some(declared) = &entry.checksum {
            if !declared.verify(&bytes) {
                return None;
            }
        }
        if let Some(expected) = expected {
            if !expected.verify(&bytes) {
                debug!("Cached blob for '{}' does not match {}", key, expected);
                return None;
            }
        }
        Some(entry)
    }

    /// Any entry pointing at `digest`.
    pub async fn find_by_digest(&self, digest: &str) -> Option<CacheEntry> {
        self.index
            .lock()
            .await
            .values()
            .find(|e| e.digest == digest)
            .cloned()
    }

    pub async fn entries(&self) -> Vec<CacheEntry> {
        self.index.lock().await.values().cloned().collect()
    }

    /// Store verified bytes under their content address and record `entry`.
    ///
    /// The blob is written to `tmp/<uuid>` and renamed into place, so readers
    /// see either no blob or a complete one.
    pub async fn store(
        &self,
        key: &str,
        name: &str,
        version: &str,
        source: &str,
        checksum: Option<Checksum>,
        bytes: &[u8],
    ) -> Result<CacheEntry, FetchError> {
        let digest = Checksum::sha256(bytes).hex;
        let blob = self.blob_path(&digest);

        if !tokio::fs::try_exists(&blob).await.unwrap_or(false) {
            let tmp = self.root.join("tmp").join(Uuid::new_v4().to_string());
            tokio::fs::write(&tmp, bytes)
                .await
                .map_err(|e| FetchError::io(&tmp, &e))?;
            if let Err(e) = tokio::fs::rename(&tmp, &blob).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(FetchError::io(&blob, &e));
            }
            debug!("Stored blob {} ({} bytes)", digest, bytes.len());
        }

        let entry = CacheEntry {
            key: key.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            digest,
            size: bytes.len() as u64,
            checksum,
            source: source.to_string(),
            stored_at: Utc::now(),
        };

        let mut index = self.index.lock().await;
        index.insert(key.to_string(), entry.clone());
        self.persist_index(&index).await?;
        Ok(entry)
    }

    async fn persist_index(&self, index: &BTreeMap<String, CacheEntry>) -> Result<(), FetchError> {
        let path = self.root.join(INDEX_FILE);
        let json = serde_json::to_vec_pretty(index).map_err(|e| FetchError::Io {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let tmp = self.root.join("tmp").join(format!("index-{}.json", Uuid::new_v4()));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| FetchError::io(&tmp, &e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| FetchError::io(&path, &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_bytes_share_one_blob() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).await.unwrap();

        let a = cache
            .store("a@1#u1", "a", "1", "u1", None, b"same bytes")
            .await
            .unwrap();
        let b = cache
            .store("b@2#u2", "b", "2", "u2", None, b"same bytes")
            .await
            .unwrap();
        assert_eq!(a.digest, b.digest);

        let blobs: Vec<_> = std::fs::read_dir(dir.path().join("blobs/sha256"))
            .unwrap()
            .collect();
        assert_eq!(blobs.len(), 1);
        assert_eq!(cache.entries().await.len(), 2);
    }

    #[tokio::test]
    async fn index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = ArtifactCache::open(dir.path()).await.unwrap();
            cache
                .store("k", "a", "1", "u", None, b"payload")
                .await
                .unwrap();
        }
        let cache = ArtifactCache::open(dir.path()).await.unwrap();
        let entry = cache.lookup_verified("k", None).await.unwrap();
        assert_eq!(entry.size, 7);
    }

    #[tokio::test]
    async fn tampered_blob_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).await.unwrap();
        let entry = cache
            .store("k", "a", "1", "u", None, b"payload")
            .await
            .unwrap();
        std::fs::write(cache.blob_path(&entry.digest), b"tampered").unwrap();
        assert!(cache.lookup_verified("k", None).await.is_none());
    }

    #[tokio::test]
    async fn lookup_rejects_blob_that_disagrees_with_expected_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::open(dir.path()).await.unwrap();
        cache
            .store("k", "a", "1", "u", None, b"payload")
            .await
            .unwrap();
        let other = Checksum::sha256(b"other payload");
        assert!(cache.lookup_verified("k", Some(&other)).await.is_none());
        let same = Checksum::sha256(b"payload");
        assert!(cache.lookup_verified("k", Some(&same)).await.is_some());
    }
}

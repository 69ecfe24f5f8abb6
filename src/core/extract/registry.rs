// ─── Known-artifact registry ───
// `<lmcp_dir>/registry.toml` plus the artifact cache index. Identifies jars
// found in `plugins/` and `mods/` by content hash or file-name prefix.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::artifact::CacheEntry;
use crate::core::error::{LmcpError, LmcpResult};
use crate::core::template::version::check_version;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub name: String,
    /// Case-insensitive file-name prefix, e.g. `LuckPerms-Bukkit-`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Pinned version; otherwise taken from the file name or jar metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Download URL. `{version}` is substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RegistryFile {
    #[serde(default, rename = "artifact")]
    artifacts: Vec<RegistryEntry>,
}

/// What the registry knows about one jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryMatch {
    pub name: String,
    pub version: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Default)]
pub struct ArtifactRegistry {
    entries: Vec<RegistryEntry>,
    cached: HashMap<String, CacheEntry>,
}

impl ArtifactRegistry {
    pub fn new(entries: Vec<RegistryEntry>) -> Self {
        Self {
            entries,
            cached: HashMap::new(),
        }
    }

    /// Load `registry.toml`; a missing file is an empty registry.
    pub fn load(path: &Path) -> LmcpResult<Self> {
        if !path.exists() {
            debug!("No artifact registry at {:?}", path);
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| LmcpError::io(path, source))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> LmcpResult<Self> {
        let file: RegistryFile = toml::from_str(raw)?;
        Ok(Self::new(file.artifacts))
    }

    /// Also recognize anything the artifact cache has stored.
    pub fn with_cache_entries(mut self, entries: impl IntoIterator<Item = CacheEntry>) -> Self {
        for entry in entries {
            self.cached.insert(entry.digest.clone(), entry);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len() + self.cached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exact hash first (registry, then cache), then the longest matching
    /// file-name prefix.
    pub fn lookup(&self, file_name: &str, sha256: &str) -> Option<RegistryMatch> {
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.sha256.as_deref().is_some_and(|h| h.eq_ignore_ascii_case(sha256)))
        {
            let version = entry
                .version
                .clone()
                .or_else(|| entry.prefix.as_deref().and_then(|p| version_after_prefix(file_name, p)));
            return Some(Self::matched(entry, version));
        }

        if let Some(cached) = self.cached.get(sha256) {
            return Some(RegistryMatch {
                name: cached.name.clone(),
                version: Some(cached.version.clone()),
                source: Some(cached.source.clone()),
            });
        }

        let lower = file_name.to_lowercase();
        self.entries
            .iter()
            .filter_map(|e| e.prefix.as_deref().map(|p| (e, p)))
            .filter(|(_, prefix)| lower.starts_with(&prefix.to_lowercase()))
            .max_by_key(|(_, prefix)| prefix.len())
            .map(|(entry, prefix)| {
                let version = entry
                    .version
                    .clone()
                    .or_else(|| version_after_prefix(file_name, prefix));
                Self::matched(entry, version)
            })
    }

    fn matched(entry: &RegistryEntry, version: Option<String>) -> RegistryMatch {
        let source = entry.source.as_ref().map(|s| match &version {
            Some(v) => s.replace("{version}", v),
            None => s.clone(),
        });
        RegistryMatch {
            name: entry.name.clone(),
            version,
            source,
        }
    }
}

/// `LuckPerms-Bukkit-5.4.102.jar` with prefix `LuckPerms-Bukkit-` → `5.4.102`.
fn version_after_prefix(file_name: &str, prefix: &str) -> Option<String> {
    let rest = file_name.get(prefix.len()..)?;
    let rest = rest.strip_suffix(".jar").unwrap_or(rest);
    let rest = rest.trim_start_matches(['-', '_', ' ', 'v']);
    check_version(rest).ok().map(|_| rest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const REGISTRY: &str = r#"
[[artifact]]
name = "LuckPerms"
prefix = "LuckPerms-Bukkit-"
source = "https://download.luckperms.net/bukkit/LuckPerms-Bukkit-{version}.jar"

[[artifact]]
name = "Lithium"
sha256 = "aa11"
version = "0.11.2"
source = "https://cdn.modrinth.com/lithium-0.11.2.jar"

[[artifact]]
name = "Luck"
prefix = "Luck"
"#;

    #[test]
    fn prefix_match_takes_version_from_file_name() {
        let registry = ArtifactRegistry::from_toml(REGISTRY).unwrap();
        let m = registry.lookup("LuckPerms-Bukkit-5.4.102.jar", "ffff").unwrap();
        assert_eq!(m.name, "LuckPerms");
        assert_eq!(m.version.as_deref(), Some("5.4.102"));
        assert_eq!(
            m.source.as_deref(),
            Some("https://download.luckperms.net/bukkit/LuckPerms-Bukkit-5.4.102.jar")
        );
    }

    #[test]
    fn hash_match_wins_over_file_name() {
        let registry = ArtifactRegistry::from_toml(REGISTRY).unwrap();
        let m = registry.lookup("renamed.jar", "AA11").unwrap();
        assert_eq!(m.name, "Lithium");
        assert_eq!(m.version.as_deref(), Some("0.11.2"));
    }

    #[test]
    fn cache_entries_are_recognized_by_digest() {
        let registry = ArtifactRegistry::default().with_cache_entries([CacheEntry {
            key: "spark@1.10.73#x".into(),
            name: "spark".into(),
            version: "1.10.73".into(),
            digest: "bb22".into(),
            size: 1,
            checksum: None,
            source: "https://example/spark.jar".into(),
            stored_at: Utc::now(),
        }]);
        let m = registry.lookup("whatever.jar", "bb22").unwrap();
        assert_eq!(m.name, "spark");
        assert!(registry.lookup("unknown.jar", "cc33").is_none());
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::model::{CoreKind, OverlayValue, ResourceLimits};
use super::overlay::OverlayFile;
use crate::core::artifact::Checksum;
use crate::core::cluster::ServerRole;
use crate::core::maven::{MavenArtifact, MAVEN_CENTRAL};

/// Where an artifact's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactLocator {
    Url { url: String },
    Maven {
        artifact: MavenArtifact,
        repository: String,
    },
}

impl ArtifactLocator {
    /// Parse a template `source` string.
    pub fn parse(source: &str, repository: Option<&str>) -> Result<Self, String> {
        if let Some(coord) = source.strip_prefix("maven:") {
            let artifact = MavenArtifact::parse(coord).map_err(|e| e.to_string())?;
            let repository = repository.unwrap_or(MAVEN_CENTRAL);
            if !(repository.starts_with("https://") || repository.starts_with("http://")) {
                return Err(format!("repository '{}' must be an http(s) URL", repository));
            }
            return Ok(ArtifactLocator::Maven {
                artifact,
                repository: repository.trim_end_matches('/').to_string(),
            });
        }

        let rest = ["https://", "http://", "file://"]
            .iter()
            .find_map(|scheme| source.strip_prefix(scheme));
        match rest {
            Some(rest) if !rest.is_empty() && !rest.contains(char::is_whitespace) => {
                Ok(ArtifactLocator::Url {
                    url: source.to_string(),
                })
            }
            Some(_) => Err(format!("'{}' is not a well-formed URL", source)),
            None => Err(format!(
                "'{}' must start with https://, http://, file:// or maven:",
                source
            )),
        }
    }

    /// Concrete URL handed to the artifact source.
    pub fn url(&self) -> String {
        match self {
            ArtifactLocator::Url { url } => url.clone(),
            ArtifactLocator::Maven {
                artifact,
                repository,
            } => artifact.url(repository),
        }
    }
}

impl fmt::Display for ArtifactLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactLocator::Url { url } => f.write_str(url),
            ArtifactLocator::Maven { artifact, .. } => write!(f, "maven:{}", artifact),
        }
    }
}

/// One file to materialize into the server's config subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedArtifact {
    /// Dependency key used for single-flight fetches and the cache index.
    pub key: String,
    pub name: String,
    pub version: String,
    pub locator: ArtifactLocator,
    pub checksum: Option<Checksum>,
    /// Destination relative to the server's `config/` directory.
    pub placement: PathBuf,
}

impl PlannedArtifact {
    pub fn new(
        name: &str,
        version: &str,
        locator: ArtifactLocator,
        checksum: Option<Checksum>,
        placement: PathBuf,
    ) -> Self {
        let mut key = format!("{}@{}#{}", name, version, locator.url());
        if let Some(checksum) = &checksum {
            key.push('!');
            key.push_str(&checksum.to_string());
        }
        Self {
            key,
            name: name.to_string(),
            version: version.to_string(),
            locator,
            checksum,
            placement,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRequirements {
    /// Public ports the server needs.
    pub ports: u8,
    /// Backends share a modern-forwarding secret with the proxy.
    pub needs_forwarding_secret: bool,
    /// Fixed port from `lmcp.yaml`, if any.
    pub preferred_port: Option<u16>,
}

/// Everything a build needs, fully resolved. Ephemeral: recomputed per build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildPlan {
    pub server: String,
    pub role: ServerRole,
    pub template_hash: String,
    pub core_kind: CoreKind,
    pub core_version: String,
    pub core: PlannedArtifact,
    /// Dependencies sorted by placement path.
    pub artifacts: Vec<PlannedArtifact>,
    pub overlays: BTreeMap<OverlayFile, BTreeMap<String, OverlayValue>>,
    pub network: NetworkRequirements,
    pub java: String,
    pub image: String,
    pub resources: ResourceLimits,
}

impl BuildPlan {
    /// Core first, then dependencies.
    pub fn all_artifacts(&self) -> impl Iterator<Item = &PlannedArtifact> {
        std::iter::once(&self.core).chain(self.artifacts.iter())
    }
}

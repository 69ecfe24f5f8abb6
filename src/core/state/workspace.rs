use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::cluster::ClusterDefinition;
use crate::core::config::{find_config_file, load_config, ClusterConfig, DEFAULT_CONFIG_FILENAME};
use crate::core::error::{LmcpError, LmcpResult};

const CACHE_APP_DIR: &str = "lmcp";
const NETWORK_TABLE_FILE: &str = "network.json";
const COMPOSE_FILE: &str = "compose.yml";
const REGISTRY_FILE: &str = "registry.toml";

/// A loaded `lmcp.yaml` plus the directory it lives in. Every path the
/// engine touches is derived here.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub config: ClusterConfig,
}

impl Workspace {
    pub fn new(root: PathBuf, config: ClusterConfig) -> Self {
        Self { root, config }
    }

    pub fn load(config_path: &Path) -> LmcpResult<Self> {
        let config = load_config(config_path)?;
        let root = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        debug!("Workspace root: {:?}", root);
        Ok(Self::new(root, config))
    }

    /// Find `lmcp.yaml` at or above `start` and load it.
    pub fn discover(start: &Path) -> LmcpResult<Self> {
        let path = find_config_file(start).ok_or_else(|| {
            LmcpError::Config(format!(
                "no {} found in {} or any parent directory; run `lmcp init` first",
                DEFAULT_CONFIG_FILENAME,
                start.display()
            ))
        })?;
        Self::load(&path)
    }

    pub fn cluster(&self) -> LmcpResult<ClusterDefinition> {
        ClusterDefinition::from_config(&self.config)
    }

    fn resolve(&self, dir: &str) -> PathBuf {
        let path = Path::new(dir);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn lmcp_dir(&self) -> PathBuf {
        self.resolve(&self.config.lmcp_dir)
    }

    pub fn servers_dir(&self) -> PathBuf {
        self.resolve(&self.config.servers_dir)
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.resolve(&self.config.templates_dir)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.lmcp_dir().join("logs")
    }

    pub fn network_table_path(&self) -> PathBuf {
        self.lmcp_dir().join(NETWORK_TABLE_FILE)
    }

    pub fn compose_path(&self) -> PathBuf {
        self.lmcp_dir().join(COMPOSE_FILE)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.lmcp_dir().join(REGISTRY_FILE)
    }

    /// Configured cache, else the platform cache directory, else `.lmcp/cache`.
    pub fn cache_dir(&self) -> PathBuf {
        match &self.config.cache_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.root.join(dir),
            None => dirs::cache_dir()
                .map(|d| d.join(CACHE_APP_DIR).join("artifacts"))
                .unwrap_or_else(|| self.lmcp_dir().join("cache")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_the_config_directory() {
        let mut config = ClusterConfig::default_for("demo");
        config.cache_dir = Some(PathBuf::from("cache"));
        let ws = Workspace::new(PathBuf::from("/srv/demo"), config);

        assert_eq!(ws.servers_dir(), PathBuf::from("/srv/demo/servers"));
        assert_eq!(ws.network_table_path(), PathBuf::from("/srv/demo/.lmcp/network.json"));
        assert_eq!(ws.logs_dir(), PathBuf::from("/srv/demo/.lmcp/logs"));
        assert_eq!(ws.cache_dir(), PathBuf::from("/srv/demo/cache"));
    }

    #[test]
    fn discover_walks_up_from_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        crate::core::config::initialize(dir.path(), "demo").unwrap();
        let nested = dir.path().join("servers");

        let ws = Workspace::discover(&nested).unwrap();
        assert_eq!(ws.config.project_name, "demo");
    }
}

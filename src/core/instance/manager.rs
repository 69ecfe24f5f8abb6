use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::model::ServerInstance;
use crate::core::error::{LmcpError, LmcpResult};

const METADATA_FILE: &str = "instance.json";

/// Reads and writes `instance.json` files under the servers directory.
#[derive(Debug, Clone)]
pub struct InstanceManager {
    servers_dir: PathBuf,
}

impl InstanceManager {
    pub fn new(servers_dir: PathBuf) -> Self {
        Self { servers_dir }
    }

    pub fn servers_dir(&self) -> &Path {
        &self.servers_dir
    }

    /// Create `config/` and `state/` if missing. Never touches their contents.
    pub async fn ensure_layout(&self, instance: &ServerInstance) -> LmcpResult<()> {
        let config_dir = instance.config_dir();
        let state_dir = instance.state_dir();
        tokio::try_join!(create_dir_safe(&config_dir), create_dir_safe(&state_dir))?;
        Ok(())
    }

    /// Persist metadata via a temp file and rename.
    pub async fn save(&self, instance: &ServerInstance) -> LmcpResult<()> {
        let json = serde_json::to_string_pretty(instance)?;
        let path = instance.metadata_path();
        create_dir_safe(&instance.path).await?;

        let tmp = instance.path.join(format!(".{}.tmp", METADATA_FILE));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|source| LmcpError::io(&tmp, source))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| LmcpError::io(&path, source))
    }

    pub async fn load(&self, name: &str) -> LmcpResult<ServerInstance> {
        let path = self.servers_dir.join(name).join(METADATA_FILE);
        if !path.exists() {
            return Err(LmcpError::ServerNotFound(name.to_string()));
        }
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| LmcpError::io(&path, source))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// `None` when the server was never built.
    pub async fn try_load(&self, name: &str) -> LmcpResult<Option<ServerInstance>> {
        match self.load(name).await {
            Ok(instance) => Ok(Some(instance)),
            Err(LmcpError::ServerNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every readable instance; corrupt metadata is skipped with a warning.
    pub async fn list(&self) -> LmcpResult<Vec<ServerInstance>> {
        let mut instances = Vec::new();
        if !self.servers_dir.exists() {
            return Ok(instances);
        }

        let mut entries = tokio::fs::read_dir(&self.servers_dir)
            .await
            .map_err(|source| LmcpError::io(&self.servers_dir, source))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| LmcpError::io(&self.servers_dir, source))?
        {
            let path = entry.path().join(METADATA_FILE);
            if !path.is_file() {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(json) => match serde_json::from_str::<ServerInstance>(&json) {
                    Ok(instance) => instances.push(instance),
                    Err(e) => warn!("Corrupt instance.json at {:?}: {}", path, e),
                },
                Err(e) => warn!("Cannot read {:?}: {}", path, e),
            }
        }

        instances.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(instances)
    }

    /// Remove an instance's metadata and config. `state/` is deleted only when
    /// `purge_state` is set.
    pub async fn delete(&self, name: &str, purge_state: bool) -> LmcpResult<()> {
        let dir = self.servers_dir.join(name);
        if !dir.exists() {
            return Err(LmcpError::ServerNotFound(name.to_string()));
        }

        if purge_state {
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|source| LmcpError::io(&dir, source))?;
            info!("Deleted server '{}' including its state", name);
            return Ok(());
        }

        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|source| LmcpError::io(&dir, source))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| LmcpError::io(&dir, source))?
        {
            if entry.file_name() == "state" {
                continue;
            }
            let path = entry.path();
            let result = if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            result.map_err(|source| LmcpError::io(&path, source))?;
        }
        info!("Deleted server '{}' (state kept)", name);
        Ok(())
    }
}

async fn create_dir_safe(path: &Path) -> LmcpResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| LmcpError::io(path, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cluster::ServerRole;
    use crate::core::instance::LifecycleState;

    #[tokio::test]
    async fn save_load_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let manager = InstanceManager::new(dir.path().to_path_buf());

        let mut survival =
            ServerInstance::new("survival", ServerRole::Backend, "survival.toml", dir.path());
        survival.transition(LifecycleState::Building).unwrap();
        manager.save(&survival).await.unwrap();
        let proxy = ServerInstance::new("velocity", ServerRole::Proxy, "velocity.toml", dir.path());
        manager.save(&proxy).await.unwrap();

        let loaded = manager.load("survival").await.unwrap();
        assert_eq!(loaded, survival);
        let names: Vec<_> = manager
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["survival", "velocity"]);
        assert!(manager.try_load("creative").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_keeps_state_unless_purged() {
        let dir = tempfile::tempdir().unwrap();
        let manager = InstanceManager::new(dir.path().to_path_buf());
        let instance =
            ServerInstance::new("survival", ServerRole::Backend, "survival.toml", dir.path());
        manager.ensure_layout(&instance).await.unwrap();
        manager.save(&instance).await.unwrap();
        std::fs::write(instance.state_dir().join("level.dat"), b"world").unwrap();

        manager.delete("survival", false).await.unwrap();
        assert!(instance.state_dir().join("level.dat").exists());
        assert!(!instance.metadata_path().exists());
        assert!(!instance.config_dir().exists());

        manager.delete("survival", true).await.unwrap();
        assert!(!instance.path.exists());
    }
}

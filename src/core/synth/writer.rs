use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::synthesizer::ConfigFileSet;
use crate::core::artifact::Checksum;
use crate::core::error::{LmcpError, LmcpResult};

pub const MANIFEST_FILE: &str = ".lmcp-manifest.json";
/// Plain list of every file in `config/`, one relative path per line. The
/// container start script deletes these from the data volume before copying
/// the new tree over it.
pub const FILE_LIST: &str = ".lmcp-files";

/// A cached artifact to copy into the config subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPlacement {
    /// Destination relative to `config/`.
    pub placement: PathBuf,
    /// Blob in the artifact cache.
    pub blob: PathBuf,
    pub digest: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub written: Vec<PathBuf>,
    /// Generated files left as the operator had them (pinned or hand-edited).
    pub preserved: Vec<PathBuf>,
    /// Files added by hand that the synthesizer does not own.
    pub carried: Vec<PathBuf>,
}

/// Path → SHA-256 of what lmcp last wrote there.
type Manifest = BTreeMap<String, String>;

fn manifest_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Writes a server's `config/` subtree. The new tree is assembled in a
/// staging directory beside it and swapped in by rename; `state/` is never
/// opened.
pub struct ConfigWriter;

impl ConfigWriter {
    pub fn commit(
        server_dir: &Path,
        set: &ConfigFileSet,
        artifacts: &[ArtifactPlacement],
    ) -> LmcpResult<CommitReport> {
        for relative in set.files.keys().chain(artifacts.iter().map(|a| &a.placement)) {
            ensure_inside(relative)?;
        }

        let config_dir = server_dir.join("config");
        let staging = server_dir.join(format!(".config.staging-{}", Uuid::new_v4()));
        fs::create_dir_all(&staging).map_err(|source| LmcpError::io(&staging, source))?;

        match Self::stage(&config_dir, &staging, set, artifacts) {
            Ok(report) => {
                Self::swap(server_dir, &config_dir, &staging)?;
                info!(
                    "Committed config for {:?}: {} written, {} preserved",
                    server_dir,
                    report.written.len(),
                    report.preserved.len()
                );
                Ok(report)
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                Err(e)
            }
        }
    }

    fn stage(
        config_dir: &Path,
        staging: &Path,
        set: &ConfigFileSet,
        artifacts: &[ArtifactPlacement],
    ) -> LmcpResult<CommitReport> {
        let previous = read_manifest(config_dir);
        let mut manifest = Manifest::new();
        let mut report = CommitReport::default();

        for (relative, contents) in &set.files {
            let key = manifest_key(relative);
            let current = config_dir.join(relative);
            let target = staging.join(relative);

            if current.is_file() {
                let on_disk = fs::read(&current).map_err(|source| LmcpError::io(&current, source))?;
                let on_disk_hash = Checksum::sha256(&on_disk).hex;
                let pinned = set.preserved.contains(relative);
                let edited = previous
                    .get(&key)
                    .is_some_and(|recorded| recorded != &on_disk_hash);
                if pinned || edited {
                    write_file(&target, &on_disk)?;
                    if let Some(recorded) = previous.get(&key) {
                        manifest.insert(key, recorded.clone());
                    }
                    debug!("Preserving operator-owned {:?}", relative);
                    report.preserved.push(relative.clone());
                    continue;
                }
            }

            write_file(&target, contents)?;
            manifest.insert(key, Checksum::sha256(contents).hex);
            report.written.push(relative.clone());
        }

        for artifact in artifacts {
            let target = staging.join(&artifact.placement);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|source| LmcpError::io(parent, source))?;
            }
            fs::copy(&artifact.blob, &target)
                .map_err(|source| LmcpError::io(&artifact.blob, source))?;
            manifest.insert(manifest_key(&artifact.placement), artifact.digest.clone());
            report.written.push(artifact.placement.clone());
        }

        // Files lmcp never wrote belong to the operator.
        for relative in list_files(config_dir)? {
            let key = manifest_key(&relative);
            if key == MANIFEST_FILE
                || key == FILE_LIST
                || previous.contains_key(&key)
                || manifest.contains_key(&key)
            {
                continue;
            }
            let source = config_dir.join(&relative);
            let bytes = fs::read(&source).map_err(|e| LmcpError::io(&source, e))?;
            write_file(&staging.join(&relative), &bytes)?;
            report.carried.push(relative);
        }

        let manifest_path = staging.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(&manifest)?;
        write_file(&manifest_path, &json)?;

        let mut listing = String::new();
        for relative in list_files(staging)? {
            listing.push_str(&manifest_key(&relative));
            listing.push('\n');
        }
        listing.push_str(FILE_LIST);
        listing.push('\n');
        write_file(&staging.join(FILE_LIST), listing.as_bytes())?;
        Ok(report)
    }

    /// `config` → `.config.old-<uuid>`, staging → `config`, then drop the old
    /// tree. The old tree is restored if the second rename fails.
    fn swap(server_dir: &Path, config_dir: &Path, staging: &Path) -> LmcpResult<()> {
        let retired = server_dir.join(format!(".config.old-{}", Uuid::new_v4()));
        let had_previous = config_dir.exists();
        if had_previous {
            fs::rename(config_dir, &retired).map_err(|source| LmcpError::io(config_dir, source))?;
        }
        if let Err(source) = fs::rename(staging, config_dir) {
            if had_previous {
                let _ = fs::rename(&retired, config_dir);
            }
            let _ = fs::remove_dir_all(staging);
            return Err(LmcpError::io(config_dir, source));
        }
        if had_previous {
            if let Err(e) = fs::remove_dir_all(&retired) {
                warn!("Could not remove retired config {:?}: {}", retired, e);
            }
        }
        Ok(())
    }

    /// Paths of generated files the operator has changed since the last commit.
    pub fn edited_files(config_dir: &Path) -> LmcpResult<Vec<PathBuf>> {
        let manifest = read_manifest(config_dir);
        let mut edited = Vec::new();
        for relative in list_files(config_dir)? {
            let Some(recorded) = manifest.get(&manifest_key(&relative)) else {
                continue;
            };
            let path = config_dir.join(&relative);
            let bytes = fs::read(&path).map_err(|source| LmcpError::io(&path, source))?;
            if &Checksum::sha256(&bytes).hex != recorded {
                edited.push(relative);
            }
        }
        Ok(edited)
    }

    /// Remove leftover staging/retired trees from an interrupted commit.
    pub fn clean_leftovers(server_dir: &Path) -> LmcpResult<()> {
        let Ok(entries) = fs::read_dir(server_dir) else {
            return Ok(());
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(".config.staging-") || name.starts_with(".config.old-") {
                let path = entry.path();
                fs::remove_dir_all(&path).map_err(|source| LmcpError::io(&path, source))?;
                debug!("Removed leftover {:?}", path);
            }
        }
        Ok(())
    }
}

/// Everything the writer places must stay below `config/`.
fn ensure_inside(relative: &Path) -> LmcpResult<()> {
    let plain = relative.components().next().is_some()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !plain {
        return Err(LmcpError::Other(format!(
            "refusing to write {} outside the config directory",
            relative.display()
        )));
    }
    Ok(())
}

fn read_manifest(config_dir: &Path) -> Manifest {
    let path = config_dir.join(MANIFEST_FILE);
    fs::read_to_string(&path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

fn write_file(path: &Path, contents: &[u8]) -> LmcpResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| LmcpError::io(parent, source))?;
    }
    fs::write(path, contents).map_err(|source| LmcpError::io(path, source))
}

/// Every file below `root`, relative to it. Missing root yields nothing.
fn list_files(root: &Path) -> LmcpResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !root.is_dir() {
        return Ok(files);
    }
    let mut pending = vec![PathBuf::new()];
    while let Some(relative) = pending.pop() {
        let dir = root.join(&relative);
        for entry in fs::read_dir(&dir).map_err(|source| LmcpError::io(&dir, source))? {
            let entry = entry.map_err(|source| LmcpError::io(&dir, source))?;
            let child = relative.join(entry.file_name());
            let file_type = entry
                .file_type()
                .map_err(|source| LmcpError::io(entry.path(), source))?;
            if file_type.is_dir() {
                pending.push(child);
            } else if file_type.is_file() {
                files.push(child);
            }
        }
    }
    files.sort();
    Ok(files)
}

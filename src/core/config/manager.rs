use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use super::model::ClusterConfig;
use crate::core::error::{LmcpError, LmcpResult};

pub const DEFAULT_CONFIG_FILENAME: &str = "lmcp.yaml";

/// Upward search stops after this many parent directories.
const MAX_SEARCH_DEPTH: usize = 50;

const HEADER: &str = "# ===================================================\n\
# LMCP Configuration\n\
# Generated by `lmcp init`\n\
# ===================================================\n";

/// Comment emitted above each top-level key of a generated file.
const SECTION_COMMENTS: &[(&str, &str)] = &[
    ("project_name", "Name of the cluster. Used as the prefix of every container name."),
    ("lmcp_dir", "Internal state: compose file, network table, per-server logs."),
    ("servers_dir", "Per-server directories. `state/` is never touched by a rebuild."),
    ("templates_dir", "Template files (TOML) referenced by `proxy` and `servers`."),
    ("cache_dir", "Shared content-addressed artifact cache."),
    ("container_env", "Container network and the image used for each Java version."),
    ("proxy", "The single reverse proxy of the cluster."),
    ("servers", "Backend servers: name -> template file."),
    ("active_servers", "Backends started by `lmcp up`. Remove the key to start all of them."),
    ("network", "Public port range handed out by the network allocator."),
    ("build", "Concurrency limits for builds and artifact downloads."),
];

/// Read a configuration file and validate it.
pub fn load_config(config_path: &Path) -> LmcpResult<ClusterConfig> {
    debug!("Reading configuration file: {:?}", config_path);
    if !config_path.exists() {
        error!("Configuration file does not exist: {:?}", config_path);
        return Err(LmcpError::Config(format!(
            "configuration file does not exist: {}",
            config_path.display()
        )));
    }

    let raw = std::fs::read_to_string(config_path)
        .map_err(|source| LmcpError::io(config_path, source))?;
    let config: ClusterConfig = serde_yaml::from_str(&raw)?;
    config.validate()?;

    info!("Loaded configuration from {:?}", config_path);
    debug!("Project name: {}", config.project_name);
    debug!("Active servers: {:?}", config.active_servers);
    Ok(config)
}

/// Write a configuration file, creating parent directories as needed.
pub fn save_config(config: &ClusterConfig, config_path: &Path) -> LmcpResult<PathBuf> {
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| LmcpError::io(parent, source))?;
    }
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(config_path, yaml).map_err(|source| LmcpError::io(config_path, source))?;
    info!("Saved configuration to {:?}", config_path);
    Ok(config_path.to_path_buf())
}

/// Write a commented default configuration.
pub fn generate_default_config(project_name: &str, config_path: &Path) -> LmcpResult<PathBuf> {
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| LmcpError::io(parent, source))?;
    }

    let config = ClusterConfig::default_for(project_name);
    let body = serde_yaml::to_string(&config)?;
    let document = with_section_comments(&body);

    std::fs::write(config_path, document).map_err(|source| LmcpError::io(config_path, source))?;
    info!(
        "Generated default configuration for '{}' at {:?}",
        project_name, config_path
    );
    Ok(config_path.to_path_buf())
}

fn with_section_comments(body: &str) -> String {
    let mut out = String::from(HEADER);
    for line in body.lines() {
        let is_top_level = !line.starts_with(' ') && !line.starts_with('-');
        if is_top_level {
            let key = line.split(':').next().unwrap_or_default();
            if let Some((_, comment)) = SECTION_COMMENTS.iter().find(|(k, _)| *k == key) {
                out.push('\n');
                out.push_str("# ");
                out.push_str(comment);
                out.push('\n');
            }
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Search for `lmcp.yaml` starting at `start` and walking up.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = std::fs::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());

    for _ in 0..MAX_SEARCH_DEPTH {
        let candidate = current.join(DEFAULT_CONFIG_FILENAME);
        debug!("Searching for config file at: {:?}", candidate);
        if candidate.is_file() {
            info!("Found configuration file at: {:?}", candidate);
            return Some(candidate);
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }

    warn!(
        "Config file search exceeded maximum depth ({} levels)",
        MAX_SEARCH_DEPTH
    );
    None
}

/// `true` when the file exists, parses and validates.
pub fn validate_config_file(config_path: &Path) -> bool {
    match load_config(config_path) {
        Ok(_) => true,
        Err(e) => {
            error!("Config validation failed for {:?}: {}", config_path, e);
            false
        }
    }
}

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::manager::{generate_default_config, DEFAULT_CONFIG_FILENAME};
use super::model::ClusterConfig;
use crate::core::error::{LmcpError, LmcpResult};
use crate::core::template::{CoreKind, CoreSpec, OverlayValue, ResourceLimits, Template};

/// Lay out a new workspace in `directory`.
///
/// Creates:
/// - `<dir>/lmcp.yaml` (skipped with a warning when it already exists)
/// - `<dir>/.lmcp/`
/// - `<dir>/templates/` with a Velocity proxy and a Paper backend starter
/// - `<dir>/servers/`
pub fn initialize(directory: &Path, project_name: &str) -> LmcpResult<PathBuf> {
    std::fs::create_dir_all(directory).map_err(|source| LmcpError::io(directory, source))?;

    let config_path = directory.join(DEFAULT_CONFIG_FILENAME);
    if config_path.exists() {
        warn!(
            "{} already exists in {:?}; keeping it",
            DEFAULT_CONFIG_FILENAME, directory
        );
    } else {
        generate_default_config(project_name, &config_path)?;
    }

    let defaults = ClusterConfig::default_for(project_name);
    for dir in [
        &defaults.lmcp_dir,
        &defaults.servers_dir,
        &defaults.templates_dir,
    ] {
        let path = directory.join(dir);
        std::fs::create_dir_all(&path).map_err(|source| LmcpError::io(&path, source))?;
    }

    let templates_dir = directory.join(&defaults.templates_dir);
    for template in starter_templates() {
        let path = templates_dir.join(format!("{}.toml", template.name));
        if path.exists() {
            continue;
        }
        template.save(&path)?;
        info!("Wrote starter template {:?}", path);
    }

    info!("Initialized lmcp workspace at {:?}", directory);
    Ok(config_path)
}

fn starter_templates() -> Vec<Template> {
    let mut velocity_config = BTreeMap::new();
    velocity_config.insert(
        "velocity.toml".to_string(),
        BTreeMap::from([
            ("motd".to_string(), OverlayValue::from("<#09add3>A Velocity Server")),
            ("show-max-players".to_string(), OverlayValue::Integer(500)),
        ]),
    );

    let mut survival_config = BTreeMap::new();
    survival_config.insert(
        "server.properties".to_string(),
        BTreeMap::from([
            ("motd".to_string(), OverlayValue::from("Survival")),
            ("difficulty".to_string(), OverlayValue::from("normal")),
            ("max-players".to_string(), OverlayValue::Integer(20)),
        ]),
    );

    vec![
        Template {
            name: "velocity".into(),
            java: Some("java17".into()),
            core: CoreSpec {
                kind: CoreKind::Velocity,
                version: "3.3.0-SNAPSHOT".into(),
                build: Some(436),
                source: None,
                checksum: None,
            },
            dependencies: Vec::new(),
            config: velocity_config,
            resources: ResourceLimits {
                memory_mb: 512,
                cpus: None,
            },
        },
        Template {
            name: "survival".into(),
            java: Some("java17".into()),
            core: CoreSpec {
                kind: CoreKind::Paper,
                version: "1.20.4".into(),
                build: Some(496),
                source: None,
                checksum: None,
            },
            dependencies: Vec::new(),
            config: survival_config,
            resources: ResourceLimits::default(),
        },
    ]
}

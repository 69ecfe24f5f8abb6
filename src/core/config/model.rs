use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::error::{ValidationError, Violation};

pub const DEFAULT_PORT_RANGE_START: u16 = 25566;
pub const DEFAULT_PORT_RANGE_END: u16 = 25665;

/// Workspace configuration persisted as `lmcp.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    pub project_name: String,
    #[serde(default = "default_lmcp_dir")]
    pub lmcp_dir: String,
    #[serde(default = "default_servers_dir")]
    pub servers_dir: String,
    #[serde(default = "default_templates_dir")]
    pub templates_dir: String,
    /// Shared artifact cache. Defaults to the platform cache directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    pub container_env: ContainerEnvConfig,
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerEntryConfig>,
    /// `None` activates every defined server.
    #[serde(default)]
    pub active_servers: Option<Vec<String>>,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub build: BuildConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerEnvConfig {
    pub network: NetworkNameConfig,
    /// Java key (`java8`, `java17`, `java21`) to container image.
    pub images: BTreeMap<String, String>,
    #[serde(default)]
    pub runtime: RuntimeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkNameConfig {
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    Auto,
    Podman,
    Docker,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_name")]
    pub name: String,
    #[serde(default = "default_proxy_template")]
    pub template: String,
    /// Fixed public port; allocated from the range when absent.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub start_order: StartOrder,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartOrder {
    #[default]
    ProxyFirst,
    BackendsFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerEntryConfig {
    pub template: String,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    pub port_range_start: u16,
    pub port_range_end: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port_range_start: DEFAULT_PORT_RANGE_START,
            port_range_end: DEFAULT_PORT_RANGE_END,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildConfig {
    pub max_parallel_builds: usize,
    pub max_parallel_downloads: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_parallel_builds: 4,
            max_parallel_downloads: 8,
        }
    }
}

fn default_lmcp_dir() -> String {
    ".lmcp".into()
}

fn default_servers_dir() -> String {
    "servers".into()
}

fn default_templates_dir() -> String {
    "templates".into()
}

fn default_proxy_name() -> String {
    "velocity".into()
}

fn default_proxy_template() -> String {
    "velocity.toml".into()
}

/// Lowercase ASCII letters, digits, `-` and `_`; must start with a letter or
/// digit; at most 32 characters. Server names end up in container names.
pub fn is_valid_server_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    name.len() <= 32
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl ClusterConfig {
    /// Default configuration written by `lmcp init`.
    pub fn default_for(project_name: &str) -> Self {
        let mut images = BTreeMap::new();
        images.insert("java8".into(), "eclipse-temurin:8-jre".into());
        images.insert("java17".into(), "eclipse-temurin:17-jre".into());
        images.insert("java21".into(), "eclipse-temurin:21-jre".into());

        Self {
            project_name: project_name.to_string(),
            lmcp_dir: default_lmcp_dir(),
            servers_dir: default_servers_dir(),
            templates_dir: default_templates_dir(),
            cache_dir: None,
            container_env: ContainerEnvConfig {
                network: NetworkNameConfig {
                    name: format!("{}_net", project_name),
                },
                images,
                runtime: RuntimeKind::Auto,
            },
            proxy: ProxyConfig {
                name: default_proxy_name(),
                template: default_proxy_template(),
                port: Some(25565),
                start_order: StartOrder::ProxyFirst,
            },
            servers: BTreeMap::new(),
            active_servers: Some(Vec::new()),
            network: NetworkConfig::default(),
            build: BuildConfig::default(),
        }
    }

    /// Batch-validate the whole file.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();

        if self.project_name.trim().is_empty() {
            violations.push(Violation::new("project_name", "must not be empty"));
        }
        if self.container_env.network.name.trim().is_empty() {
            violations.push(Violation::new("container_env.network.name", "must not be empty"));
        }
        if self.container_env.images.is_empty() {
            violations.push(Violation::new(
                "container_env.images",
                "at least one java image must be declared",
            ));
        }
        if !is_valid_server_name(&self.proxy.name) {
            violations.push(Violation::new(
                "proxy.name",
                format!("'{}' is not a valid server name", self.proxy.name),
            ));
        }

        let mut fixed_ports: BTreeMap<u16, String> = BTreeMap::new();
        if let Some(port) = self.proxy.port {
            fixed_ports.insert(port, self.proxy.name.clone());
        }

        for (name, entry) in &self.servers {
            let field = format!("servers.{}", name);
            if !is_valid_server_name(name) {
                violations.push(Violation::new(&field, "is not a valid server name"));
            }
            if name == &self.proxy.name {
                violations.push(Violation::new(
                    &field,
                    "collides with the proxy's name; server names must be unique",
                ));
            }
            if entry.template.trim().is_empty() {
                violations.push(Violation::new(format!("{}.template", field), "must not be empty"));
            }
            if let Some(port) = entry.port {
                if let Some(holder) = fixed_ports.insert(port, name.clone()) {
                    violations.push(Violation::new(
                        format!("{}.port", field),
                        format!("port {} is already fixed for '{}'", port, holder),
                    ));
                }
            }
        }

        if let Some(active) = &self.active_servers {
            let mut seen = BTreeSet::new();
            for name in active {
                if !seen.insert(name) {
                    violations.push(Violation::new(
                        "active_servers",
                        format!("'{}' is listed more than once", name),
                    ));
                }
            }
        }

        if self.network.port_range_start > self.network.port_range_end {
            violations.push(Violation::new(
                "network",
                format!(
                    "port_range_start {} is above port_range_end {}",
                    self.network.port_range_start, self.network.port_range_end
                ),
            ));
        }
        if self.build.max_parallel_builds == 0 {
            violations.push(Violation::new("build.max_parallel_builds", "must be at least 1"));
        }
        if self.build.max_parallel_downloads == 0 {
            violations.push(Violation::new("build.max_parallel_downloads", "must be at least 1"));
        }

        ValidationError::check("lmcp.yaml", violations)
    }
}

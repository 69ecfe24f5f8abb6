// ─── Cluster Definition ───
// The explicit cluster context passed into every component call.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::config::{ClusterConfig, StartOrder};
use crate::core::error::{LmcpResult, ValidationError, Violation};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    Proxy,
    Backend,
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRole::Proxy => write!(f, "proxy"),
            ServerRole::Backend => write!(f, "backend"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMember {
    pub name: String,
    pub role: ServerRole,
    /// Template file, relative to the templates directory.
    pub template: String,
    /// Fixed public port requested in `lmcp.yaml`.
    pub fixed_port: Option<u16>,
}

/// Named servers plus the identity of the single proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDefinition {
    pub project: String,
    pub network_name: String,
    pub start_order: StartOrder,
    proxy: String,
    members: BTreeMap<String, ClusterMember>,
    /// Backends taking part in `up`.
    active: BTreeSet<String>,
    images: BTreeMap<String, String>,
}

impl ClusterDefinition {
    /// Start a definition with its proxy; backends are added with
    /// [`ClusterDefinition::with_backend`].
    pub fn new(project: &str, proxy_name: &str, proxy_template: &str) -> Self {
        let mut members = BTreeMap::new();
        members.insert(
            proxy_name.to_string(),
            ClusterMember {
                name: proxy_name.to_string(),
                role: ServerRole::Proxy,
                template: proxy_template.to_string(),
                fixed_port: None,
            },
        );
        Self {
            project: project.to_string(),
            network_name: format!("{}_net", project),
            start_order: StartOrder::ProxyFirst,
            proxy: proxy_name.to_string(),
            members,
            active: BTreeSet::new(),
            images: BTreeMap::new(),
        }
    }

    pub fn with_backend(mut self, name: &str, template: &str) -> Self {
        self.members.insert(
            name.to_string(),
            ClusterMember {
                name: name.to_string(),
                role: ServerRole::Backend,
                template: template.to_string(),
                fixed_port: None,
            },
        );
        self.active.insert(name.to_string());
        self
    }

    pub fn with_image(mut self, java_key: &str, image: &str) -> Self {
        self.images.insert(java_key.to_string(), image.to_string());
        self
    }

    pub fn with_fixed_port(mut self, server: &str, port: u16) -> Self {
        if let Some(member) = self.members.get_mut(server) {
            member.fixed_port = Some(port);
        }
        self
    }

    pub fn with_start_order(mut self, order: StartOrder) -> Self {
        self.start_order = order;
        self
    }

    /// Build from a validated `lmcp.yaml`.
    pub fn from_config(config: &ClusterConfig) -> LmcpResult<Self> {
        config.validate()?;

        let mut cluster = Self::new(
            &config.project_name,
            &config.proxy.name,
            &config.proxy.template,
        )
        .with_start_order(config.proxy.start_order);
        cluster.network_name = config.container_env.network.name.clone();
        cluster.images = config.container_env.images.clone();
        if let Some(port) = config.proxy.port {
            cluster = cluster.with_fixed_port(&config.proxy.name, port);
        }

        for (name, entry) in &config.servers {
            cluster = cluster.with_backend(name, &entry.template);
            if let Some(port) = entry.port {
                cluster = cluster.with_fixed_port(name, port);
            }
        }

        if let Some(active) = &config.active_servers {
            cluster.active.clear();
            for name in active {
                if config.servers.contains_key(name) {
                    cluster.active.insert(name.clone());
                } else if name == &config.proxy.name {
                    // The proxy always runs; listing it is harmless.
                } else {
                    warn!(
                        "Server '{}' from 'active_servers' is not defined in 'servers' and will be ignored",
                        name
                    );
                }
            }
        }

        cluster.verify()?;
        Ok(cluster)
    }

    /// Structural invariants: exactly one proxy, every member named after its key.
    pub fn verify(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        let proxies: Vec<_> = self
            .members
            .values()
            .filter(|m| m.role == ServerRole::Proxy)
            .collect();
        if proxies.len() != 1 {
            violations.push(Violation::new(
                "proxy",
                format!("a cluster needs exactly one proxy, found {}", proxies.len()),
            ));
        }
        if !self.members.contains_key(&self.proxy) {
            violations.push(Violation::new("proxy", "proxy is not a cluster member"));
        }
        for (key, member) in &self.members {
            if key != &member.name {
                violations.push(Violation::new(
                    format!("servers.{}", key),
                    format!("entry is registered under a different name '{}'", member.name),
                ));
            }
        }
        ValidationError::check(&self.project, violations)
    }

    pub fn proxy_name(&self) -> &str {
        &self.proxy
    }

    pub fn member(&self, name: &str) -> Option<&ClusterMember> {
        self.members.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    pub fn members(&self) -> impl Iterator<Item = &ClusterMember> {
        self.members.values()
    }

    pub fn backends(&self) -> impl Iterator<Item = &ClusterMember> {
        self.members
            .values()
            .filter(|m| m.role == ServerRole::Backend)
    }

    pub fn is_active(&self, name: &str) -> bool {
        name == self.proxy || self.active.contains(name)
    }

    /// Proxy plus active backends, sorted by name.
    pub fn active_members(&self) -> impl Iterator<Item = &ClusterMember> {
        self.members.values().filter(|m| self.is_active(&m.name))
    }

    /// Order in which `up` starts services; `down` stops in reverse.
    pub fn start_sequence(&self) -> Vec<String> {
        let backends: Vec<String> = self
            .backends()
            .filter(|m| self.is_active(&m.name))
            .map(|m| m.name.clone())
            .collect();
        match self.start_order {
            StartOrder::ProxyFirst => std::iter::once(self.proxy.clone())
                .chain(backends)
                .collect(),
            StartOrder::BackendsFirst => backends
                .into_iter()
                .chain(std::iter::once(self.proxy.clone()))
                .collect(),
        }
    }

    pub fn image_for(&self, java_key: &str) -> Option<&str> {
        self.images.get(java_key).map(String::as_str)
    }

    pub fn image_keys(&self) -> impl Iterator<Item = &String> {
        self.images.keys()
    }

    /// Container name, also the server's hostname on the cluster network.
    pub fn container_name(&self, server: &str) -> String {
        format!(
            "{}-{}",
            self.project.to_lowercase().replace(' ', "-"),
            server
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ServerEntryConfig;

    fn sample() -> ClusterDefinition {
        ClusterDefinition::new("My Cluster", "velocity", "velocity.toml")
            .with_backend("survival", "survival.toml")
            .with_backend("creative", "creative.toml")
    }

    #[test]
    fn container_names_are_normalized() {
        assert_eq!(sample().container_name("survival"), "my-cluster-survival");
    }

    #[test]
    fn start_sequence_honors_order() {
        let cluster = sample();
        assert_eq!(
            cluster.start_sequence(),
            vec!["velocity", "creative", "survival"]
        );
        let cluster = cluster.with_start_order(StartOrder::BackendsFirst);
        assert_eq!(
            cluster.start_sequence(),
            vec!["creative", "survival", "velocity"]
        );
    }

    #[test]
    fn active_servers_filter_ignores_unknown_names() {
        let mut config = ClusterConfig::default_for("demo");
        config.servers.insert(
            "survival".into(),
            ServerEntryConfig {
                template: "survival.toml".into(),
                port: None,
            },
        );
        config.servers.insert(
            "creative".into(),
            ServerEntryConfig {
                template: "creative.toml".into(),
                port: None,
            },
        );
        config.active_servers = Some(vec!["survival".into(), "ghost".into()]);

        let cluster = ClusterDefinition::from_config(&config).unwrap();
        assert!(cluster.is_active("survival"));
        assert!(!cluster.is_active("creative"));
        assert!(cluster.is_active("velocity"));
        assert!(!cluster.contains("ghost"));
    }

    #[test]
    fn missing_active_list_activates_everything() {
        let mut config = ClusterConfig::default_for("demo");
        config.servers.insert(
            "survival".into(),
            ServerEntryConfig {
                template: "survival.toml".into(),
                port: None,
            },
        );
        config.active_servers = None;
        let cluster = ClusterDefinition::from_config(&config).unwrap();
        assert!(cluster.is_active("survival"));
    }
}

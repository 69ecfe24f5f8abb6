use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::debug;

use super::defaults;
use super::format::{render_properties, Node};
use crate::core::cluster::{ClusterDefinition, ServerRole};
use crate::core::error::{LmcpError, LmcpResult};
use crate::core::instance::ServerInstance;
use crate::core::network::NetworkAllocation;
use crate::core::template::{BuildPlan, ConfigFormat, CoreKind, OverlayFile, OverlayValue};

/// Port every server listens on inside its container.
pub const CONTAINER_GAME_PORT: u16 = 25565;

/// File the proxy reads per-backend forwarding secrets from: a `[secrets]`
/// table keyed by backend name.
///
/// Stock Velocity reads `forwarding-secret-file` as one raw secret and will
/// reject every backend with this table. The proxy template must carry a
/// forwarding plugin that understands per-backend secrets.
pub const FORWARDING_SECRETS_FILE: &str = "forwarding-secrets.toml";

/// Generated config files keyed by path relative to `config/`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFileSet {
    pub files: BTreeMap<PathBuf, Vec<u8>>,
    /// Pinned paths the writer must carry over from the previous config.
    pub preserved: BTreeSet<PathBuf>,
}

impl ConfigFileSet {
    fn insert(&mut self, path: impl Into<PathBuf>, contents: String) {
        self.files.insert(path.into(), contents.into_bytes());
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(&PathBuf::from(path)).map(Vec::as_slice)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// Cluster-wide inputs for one synthesis: the definition plus every
/// finalized allocation, so the proxy's backend list never depends on start
/// order.
#[derive(Debug, Clone, Copy)]
pub struct ClusterView<'a> {
    pub cluster: &'a ClusterDefinition,
    pub allocations: &'a BTreeMap<String, NetworkAllocation>,
}

impl<'a> ClusterView<'a> {
    pub fn new(
        cluster: &'a ClusterDefinition,
        allocations: &'a BTreeMap<String, NetworkAllocation>,
    ) -> Self {
        Self {
            cluster,
            allocations,
        }
    }

    /// Active backends that hold an allocation, sorted by name.
    fn registered_backends(self) -> impl Iterator<Item = &'a NetworkAllocation> {
        let cluster = self.cluster;
        let allocations = self.allocations;
        cluster
            .backends()
            .filter(move |m| cluster.is_active(&m.name))
            .filter_map(move |m| allocations.get(&m.name))
    }
}

/// Pure config synthesis: defaults, then template overlays, then network
/// parameters. Same inputs, same bytes.
pub struct ConfigSynthesizer;

impl ConfigSynthesizer {
    pub fn synthesize(
        plan: &BuildPlan,
        allocation: &NetworkAllocation,
        view: ClusterView<'_>,
        existing: Option<&ServerInstance>,
    ) -> LmcpResult<ConfigFileSet> {
        let mut layers: BTreeMap<OverlayFile, BTreeMap<String, OverlayValue>> = BTreeMap::new();

        for file in defaults::always_written(plan.core_kind) {
            layers.insert(*file, defaults::defaults_for(*file, plan.core_kind));
        }
        for (file, overlay) in &plan.overlays {
            let layer = layers
                .entry(*file)
                .or_insert_with(|| defaults::defaults_for(*file, plan.core_kind));
            layer.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let mut set = ConfigFileSet::default();
        match plan.role {
            ServerRole::Proxy => {
                Self::proxy_network(&mut layers);
                let secrets = Self::forwarding_secrets(view)?;
                set.insert(FORWARDING_SECRETS_FILE, secrets);
            }
            ServerRole::Backend => {
                let secret = allocation.forwarding_secret.as_deref().ok_or_else(|| {
                    LmcpError::Other(format!(
                        "backend '{}' has no forwarding secret allocated",
                        plan.server
                    ))
                })?;
                Self::backend_network(plan.core_kind, secret, &mut layers, &mut set)?;
                set.insert("eula.txt", "eula=true\n".to_string());
            }
        }

        for (file, entries) in &layers {
            let rendered = match file.format() {
                ConfigFormat::Properties => render_properties(entries),
                ConfigFormat::Toml => {
                    let mut root = Node::from_dotted(entries);
                    if *file == OverlayFile::VelocityToml {
                        root.insert_child("servers", Self::proxy_servers(view));
                        root.insert_child("forced-hosts", Node::branch());
                    }
                    root.to_toml()?
                }
                ConfigFormat::Yaml => Node::from_dotted(entries).to_yaml()?,
            };
            set.insert(file.relative_path(), rendered);
        }

        if let Some(instance) = existing {
            set.preserved = instance
                .pinned_files
                .iter()
                .filter(|p| set.files.contains_key(*p))
                .cloned()
                .collect();
        }

        debug!(
            "Synthesized {} config files for '{}'",
            set.files.len(),
            plan.server
        );
        Ok(set)
    }

    fn proxy_network(layers: &mut BTreeMap<OverlayFile, BTreeMap<String, OverlayValue>>) {
        let velocity = layers.entry(OverlayFile::VelocityToml).or_default();
        velocity.insert(
            "bind".into(),
            OverlayValue::String(format!("0.0.0.0:{}", CONTAINER_GAME_PORT)),
        );
        velocity.insert("player-info-forwarding-mode".into(), "modern".into());
        velocity.insert(
            "forwarding-secret-file".into(),
            FORWARDING_SECRETS_FILE.into(),
        );
    }

    /// `[servers]` of velocity.toml: every registered backend plus `try`.
    fn proxy_servers(view: ClusterView<'_>) -> Node {
        let mut servers = Node::branch();
        let mut order = Vec::new();
        for allocation in view.registered_backends() {
            servers.insert_child(
                &allocation.server,
                Node::Leaf(OverlayValue::String(format!(
                    "{}:{}",
                    allocation.hostname, CONTAINER_GAME_PORT
                ))),
            );
            order.push(OverlayValue::String(allocation.server.clone()));
        }
        servers.insert_child("try", Node::List(order));
        servers
    }

    fn forwarding_secrets(view: ClusterView<'_>) -> LmcpResult<String> {
        let mut secrets = Node::branch();
        for allocation in view.registered_backends() {
            if let Some(secret) = &allocation.forwarding_secret {
                secrets.insert_child(&allocation.server, Node::Leaf(secret.as_str().into()));
            }
        }
        let mut root = Node::branch();
        root.insert_child("secrets", secrets);
        root.to_toml()
    }

    fn backend_network(
        kind: CoreKind,
        secret: &str,
        layers: &mut BTreeMap<OverlayFile, BTreeMap<String, OverlayValue>>,
        set: &mut ConfigFileSet,
    ) -> LmcpResult<()> {
        if let Some(props) = layers.get_mut(&OverlayFile::ServerProperties) {
            props.insert("server-ip".into(), "".into());
            props.insert(
                "server-port".into(),
                OverlayValue::Integer(CONTAINER_GAME_PORT as i64),
            );
            // The proxy authenticates players.
            props.insert("online-mode".into(), false.into());
        }

        match kind {
            CoreKind::Paper | CoreKind::Purpur => {
                layers
                    .entry(OverlayFile::SpigotYml)
                    .or_default()
                    .insert("settings.bungeecord".into(), false.into());
                let paper = layers.entry(OverlayFile::PaperGlobalYml).or_default();
                paper.insert("proxies.velocity.enabled".into(), true.into());
                paper.insert("proxies.velocity.online-mode".into(), true.into());
                paper.insert("proxies.velocity.secret".into(), secret.into());
            }
            CoreKind::Fabric => {
                let mut proxy = Node::branch();
                proxy.insert_child("hackOnlineMode", Node::Leaf(true.into()));
                proxy.insert_child("hackEarlySend", Node::Leaf(false.into()));
                proxy.insert_child("secret", Node::Leaf(secret.into()));
                set.insert("config/FabricProxy-Lite.toml", proxy.to_toml()?);
            }
            CoreKind::Vanilla | CoreKind::Velocity => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::core::cluster::ClusterDefinition;
    use crate::core::template::{CoreSpec, ResourceLimits, Template, TemplateResolver};

    fn cluster() -> ClusterDefinition {
        ClusterDefinition::new("demo", "velocity", "velocity.toml")
            .with_backend("survival", "survival.toml")
            .with_backend("creative", "creative.toml")
            .with_image("java17", "eclipse-temurin:17-jre")
    }

    fn template(kind: CoreKind, name: &str) -> Template {
        let mut config = BTreeMap::new();
        let (file, key) = if kind == CoreKind::Velocity {
            ("velocity.toml", "motd")
        } else {
            ("server.properties", "motd")
        };
        config.insert(
            file.to_string(),
            BTreeMap::from([(key.to_string(), OverlayValue::from(name))]),
        );
        Template {
            name: name.into(),
            java: Some("java17".into()),
            core: CoreSpec {
                kind,
                version: if kind == CoreKind::Velocity {
                    "3.3.0-SNAPSHOT".into()
                } else {
                    "1.20.4".into()
                },
                build: Some(1),
                source: None,
                checksum: None,
            },
            dependencies: Vec::new(),
            config,
            resources: ResourceLimits::default(),
        }
    }

    fn allocation(server: &str, port: u16, secret: Option<&str>) -> NetworkAllocation {
        NetworkAllocation {
            server: server.into(),
            ports: vec![port],
            forwarding_secret: secret.map(str::to_string),
            hostname: format!("demo-{}", server),
            fixed: false,
            allocated_at: Utc::now(),
        }
    }

    fn allocations() -> BTreeMap<String, NetworkAllocation> {
        BTreeMap::from([
            ("velocity".to_string(), allocation("velocity", 25565, None)),
            ("survival".to_string(), allocation("survival", 25566, Some("s1"))),
            ("creative".to_string(), allocation("creative", 25567, Some("c1"))),
        ])
    }

    #[test]
    fn backend_gets_overlays_and_network_parameters() {
        let cluster = cluster();
        let plan = TemplateResolver::new(&cluster)
            .resolve(&template(CoreKind::Paper, "survival"), "survival")
            .unwrap();
        let allocations = allocations();
        let set = ConfigSynthesizer::synthesize(
            &plan,
            &allocations["survival"],
            ClusterView::new(&cluster, &allocations),
            None,
        )
        .unwrap();

        let props = set.get_str("server.properties").unwrap();
        assert!(props.contains("motd=survival\n"));
        assert!(props.contains("online-mode=false\n"));
        assert!(props.contains("server-port=25565\n"));
        let paper = set.get_str("config/paper-global.yml").unwrap();
        assert!(paper.contains("secret: s1"));
        assert!(set.get_str("eula.txt").is_some());
    }

    #[test]
    fn proxy_lists_every_backend_with_its_secret() {
        let cluster = cluster();
        let plan = TemplateResolver::new(&cluster)
            .resolve(&template(CoreKind::Velocity, "velocity"), "velocity")
            .unwrap();
        let allocations = allocations();
        let set = ConfigSynthesizer::synthesize(
            &plan,
            &allocations["velocity"],
            ClusterView::new(&cluster, &allocations),
            None,
        )
        .unwrap();

        let velocity: toml::Table = toml::from_str(set.get_str("velocity.toml").unwrap()).unwrap();
        assert_eq!(velocity["player-info-forwarding-mode"].as_str(), Some("modern"));
        assert_eq!(
            velocity["forwarding-secret-file"].as_str(),
            Some(FORWARDING_SECRETS_FILE)
        );
        assert_eq!(velocity["motd"].as_str(), Some("velocity"));
        let servers = velocity["servers"].as_table().unwrap();
        assert_eq!(servers["survival"].as_str(), Some("demo-survival:25565"));
        assert_eq!(servers["try"].as_array().unwrap().len(), 2);

        let secrets: toml::Table =
            toml::from_str(set.get_str(FORWARDING_SECRETS_FILE).unwrap()).unwrap();
        assert_eq!(secrets["secrets"]["creative"].as_str(), Some("c1"));
    }

    #[test]
    fn synthesis_is_byte_identical_across_runs() {
        let cluster = cluster();
        let plan = TemplateResolver::new(&cluster)
            .resolve(&template(CoreKind::Paper, "creative"), "creative")
            .unwrap();
        let allocations = allocations();
        let view = ClusterView::new(&cluster, &allocations);
        let a = ConfigSynthesizer::synthesize(&plan, &allocations["creative"], view, None).unwrap();
        let b = ConfigSynthesizer::synthesize(&plan, &allocations["creative"], view, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn pinned_files_are_marked_preserved() {
        let cluster = cluster();
        let plan = TemplateResolver::new(&cluster)
            .resolve(&template(CoreKind::Paper, "survival"), "survival")
            .unwrap();
        let allocations = allocations();
        let mut instance = ServerInstance::new(
            "survival",
            ServerRole::Backend,
            "survival.toml",
            std::path::Path::new("/srv"),
        );
        instance.pinned_files.insert(PathBuf::from("server.properties"));
        instance.pinned_files.insert(PathBuf::from("not-generated.yml"));
        let set = ConfigSynthesizer::synthesize(
            &plan,
            &allocations["survival"],
            ClusterView::new(&cluster, &allocations),
            Some(&instance),
        )
        .unwrap();
        assert_eq!(
            set.preserved,
            BTreeSet::from([PathBuf::from("server.properties")])
        );
    }
}

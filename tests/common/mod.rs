#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lmcp_lib::core::artifact::{ArtifactCache, ArtifactFetcher, Checksum, MemorySource};
use lmcp_lib::core::cluster::ClusterDefinition;
use lmcp_lib::core::instance::InstanceManager;
use lmcp_lib::core::logs::ServerLogs;
use lmcp_lib::core::network::NetworkAllocator;
use lmcp_lib::core::orchestrator::{EngineParts, OrchestrationEngine};
use lmcp_lib::core::runtime::MemoryRuntime;
use lmcp_lib::core::template::{
    CoreKind, CoreSpec, Dependency, DependencyKind, ResourceLimits, Template,
};

pub const PAPER_URL: &str = "https://artifacts.test/paper-1.20.4-496.jar";
pub const VELOCITY_URL: &str = "https://artifacts.test/velocity-3.3.0-436.jar";
pub const PLUGIN_URL: &str = "https://artifacts.test/luckperms-5.4.102.jar";

pub const PAPER_BYTES: &[u8] = b"paper core bytes";
pub const VELOCITY_BYTES: &[u8] = b"velocity core bytes";
pub const PLUGIN_BYTES: &[u8] = b"luckperms plugin bytes";

pub fn sha256(bytes: &[u8]) -> String {
    Checksum::sha256(bytes).to_string()
}

/// Velocity proxy plus `survival` and `creative` Paper backends.
pub fn cluster() -> ClusterDefinition {
    ClusterDefinition::new("demo", "velocity", "velocity.toml")
        .with_backend("survival", "survival.toml")
        .with_backend("creative", "creative.toml")
        .with_image("java17", "eclipse-temurin:17-jre")
}

pub fn proxy_template() -> Template {
    Template {
        name: "velocity".into(),
        java: Some("java17".into()),
        core: CoreSpec {
            kind: CoreKind::Velocity,
            version: "3.3.0".into(),
            build: None,
            source: Some(VELOCITY_URL.into()),
            checksum: Some(sha256(VELOCITY_BYTES)),
        },
        dependencies: vec![],
        config: Default::default(),
        resources: ResourceLimits {
            memory_mb: 512,
            cpus: None,
        },
    }
}

pub fn backend_template(name: &str) -> Template {
    Template {
        name: name.into(),
        java: Some("java17".into()),
        core: CoreSpec {
            kind: CoreKind::Paper,
            version: "1.20.4".into(),
            build: None,
            source: Some(PAPER_URL.into()),
            checksum: Some(sha256(PAPER_BYTES)),
        },
        dependencies: vec![Dependency {
            name: "LuckPerms".into(),
            version: "5.4.102".into(),
            kind: DependencyKind::Plugin,
            source: Some(PLUGIN_URL.into()),
            checksum: Some(sha256(PLUGIN_BYTES)),
            repository: None,
        }],
        config: Default::default(),
        resources: ResourceLimits::default(),
    }
}

pub fn source() -> MemorySource {
    let source = MemorySource::new();
    source.insert(PAPER_URL, PAPER_BYTES);
    source.insert(VELOCITY_URL, VELOCITY_BYTES);
    source.insert(PLUGIN_URL, PLUGIN_BYTES);
    source
}

/// A throwaway workspace: templates on disk, in-memory runtime and
/// allocator, a real artifact cache.
pub struct Harness {
    pub root: PathBuf,
    pub engine: Arc<OrchestrationEngine>,
    pub runtime: Arc<MemoryRuntime>,
}

impl Harness {
    pub async fn new(root: &Path, source: MemorySource) -> Self {
        Self::with_allocator(root, source, NetworkAllocator::in_memory(25566, 25665)).await
    }

    pub async fn with_allocator(
        root: &Path,
        source: MemorySource,
        allocator: NetworkAllocator,
    ) -> Self {
        let templates_dir = root.join("templates");
        proxy_template()
            .save(&templates_dir.join("velocity.toml"))
            .unwrap();
        for name in ["survival", "creative"] {
            backend_template(name)
                .save(&templates_dir.join(format!("{}.toml", name)))
                .unwrap();
        }

        let cache = Arc::new(ArtifactCache::open(&root.join("cache")).await.unwrap());
        let runtime = Arc::new(MemoryRuntime::new());
        let engine = OrchestrationEngine::new(EngineParts {
            cluster: cluster(),
            templates_dir,
            instances: InstanceManager::new(root.join("servers")),
            fetcher: ArtifactFetcher::new(cache, Arc::new(source)),
            allocator,
            runtime: runtime.clone(),
            logs: ServerLogs::new(root.join(".lmcp/logs")),
            max_parallel_builds: 4,
        });

        Self {
            root: root.to_path_buf(),
            engine: Arc::new(engine),
            runtime,
        }
    }

    pub fn server_dir(&self, name: &str) -> PathBuf {
        self.root.join("servers").join(name)
    }
}

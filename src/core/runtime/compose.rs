use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ContainerRuntime, ContainerState, ContainerStatus, ServiceSpec};
use crate::core::config::RuntimeKind;
use crate::core::error::RuntimeError;

const COMPOSE_VERSION: &str = "3.8";

// ── compose.yml document ────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeFile {
    pub version: String,
    pub services: BTreeMap<String, ComposeService>,
    pub networks: BTreeMap<String, ComposeNetwork>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeService {
    pub image: String,
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    pub networks: Vec<String>,
    pub restart: String,
    pub stdin_open: bool,
    pub tty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeNetwork {
    pub driver: String,
    /// Fixed network name, so compose does not prefix it with the project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ComposeService {
    pub fn from_spec(network: &str, spec: &ServiceSpec) -> Self {
        Self {
            image: spec.image.clone(),
            container_name: spec.container_name.clone(),
            // Compose interpolates `$NAME`; the shell should see it instead.
            command: spec.command.iter().map(|c| c.replace('$', "$$")).collect(),
            environment: spec.env.clone(),
            ports: spec
                .ports
                .iter()
                .map(|p| format!("{}:{}", p.host, p.container))
                .collect(),
            volumes: spec
                .volumes
                .iter()
                .map(|v| {
                    let mut mount = format!("{}:{}", v.host.display(), v.container);
                    if v.read_only {
                        mount.push_str(":ro");
                    }
                    mount
                })
                .collect(),
            networks: vec![network.to_string()],
            restart: "unless-stopped".into(),
            stdin_open: true,
            tty: true,
            mem_limit: spec.memory_mb.map(|mb| format!("{}m", mb)),
            cpus: spec.cpus,
        }
    }
}

impl ComposeFile {
    pub fn new(network: &str, services: BTreeMap<String, ComposeService>) -> Self {
        let mut networks = BTreeMap::new();
        networks.insert(
            network.to_string(),
            ComposeNetwork {
                driver: "bridge".into(),
                name: Some(network.to_string()),
            },
        );

        Self {
            version: COMPOSE_VERSION.into(),
            services,
            networks,
        }
    }

    pub fn render(network: &str, services: &BTreeMap<String, ServiceSpec>) -> Self {
        let services = services
            .iter()
            .map(|(name, spec)| (name.clone(), ComposeService::from_spec(network, spec)))
            .collect();
        Self::new(network, services)
    }

    /// Services of an existing compose file. A missing or unreadable file
    /// yields none.
    pub fn load_services(path: &Path) -> BTreeMap<String, ComposeService> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                warn!("Cannot read {:?}, starting without services: {}", path, e);
                return BTreeMap::new();
            }
        };
        match serde_yaml::from_str::<ComposeFile>(&raw) {
            Ok(file) => file.services,
            Err(e) => {
                warn!("Ignoring malformed compose file {:?}: {}", path, e);
                BTreeMap::new()
            }
        }
    }
}

// ── Tool detection ──────────────────────────────────────

/// A compose front-end plus the engine it drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeTool {
    pub compose: PathBuf,
    pub engine: PathBuf,
}

impl ComposeTool {
    /// Find `podman-compose` (preferred) or `docker-compose` in `PATH`.
    pub fn detect(kind: RuntimeKind) -> Option<Self> {
        let candidates: &[(&str, &str)] = match kind {
            RuntimeKind::Auto => &[("podman-compose", "podman"), ("docker-compose", "docker")],
            RuntimeKind::Podman => &[("podman-compose", "podman")],
            RuntimeKind::Docker => &[("docker-compose", "docker")],
        };
        for (compose, engine) in candidates {
            if let (Some(compose), Some(engine)) = (which(compose), which(engine)) {
                info!("Using container runtime {:?}", compose);
                return Some(Self { compose, engine });
            }
        }
        None
    }
}

fn which(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

// ── Runtime ─────────────────────────────────────────────

/// Runtime backed by a generated `compose.yml` and the compose CLI.
///
/// Services defined by earlier runs are read back from the file, so every
/// rewrite still lists them.
pub struct ComposeRuntime {
    compose_path: PathBuf,
    project: String,
    network: String,
    kind: RuntimeKind,
    services: Mutex<BTreeMap<String, ComposeService>>,
}

impl ComposeRuntime {
    pub fn new(compose_path: PathBuf, project: &str, network: &str, kind: RuntimeKind) -> Self {
        let services = ComposeFile::load_services(&compose_path);
        if !services.is_empty() {
            debug!("Loaded {} service(s) from {:?}", services.len(), compose_path);
        }
        Self {
            compose_path,
            project: project.to_lowercase().replace(' ', "-"),
            network: network.to_string(),
            kind,
            services: Mutex::new(services),
        }
    }

    pub fn compose_path(&self) -> &Path {
        &self.compose_path
    }

    fn tool(&self, service: &str, operation: &str) -> Result<ComposeTool, RuntimeError> {
        ComposeTool::detect(self.kind).ok_or_else(|| {
            RuntimeError::new(
                service,
                operation,
                "neither podman-compose nor docker-compose was found in PATH",
            )
        })
    }

    async fn write_compose(
        &self,
        services: &BTreeMap<String, ComposeService>,
    ) -> Result<(), RuntimeError> {
        let document = ComposeFile::new(&self.network, services.clone());
        let yaml = serde_yaml::to_string(&document)
            .map_err(|e| RuntimeError::new("*", "render compose file", e.to_string()))?;
        if let Some(parent) = self.compose_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RuntimeError::new("*", "write compose file", e.to_string()))?;
        }
        tokio::fs::write(&self.compose_path, yaml)
            .await
            .map_err(|e| RuntimeError::new("*", "write compose file", e.to_string()))?;
        debug!("Wrote {:?} with {} services", self.compose_path, services.len());
        Ok(())
    }

    async fn container_name(&self, service: &str) -> String {
        self.services
            .lock()
            .await
            .get(service)
            .map(|s| s.container_name.clone())
            .unwrap_or_else(|| format!("{}-{}", self.project, service))
    }

    /// `<compose> -f <file> -p <project> <args…>`
    async fn compose(&self, service: &str, operation: &str, args: &[&str]) -> Result<String, RuntimeError> {
        let tool = self.tool(service, operation)?;
        let mut command = Command::new(&tool.compose);
        command
            .arg("-f")
            .arg(&self.compose_path)
            .arg("-p")
            .arg(&self.project)
            .args(args);
        run(command, service, operation).await
    }

    async fn engine(&self, service: &str, operation: &str, args: &[&str]) -> Result<String, RuntimeError> {
        let tool = self.tool(service, operation)?;
        let mut command = Command::new(&tool.engine);
        command.args(args);
        run(command, service, operation).await
    }
}

async fn run(mut command: Command, service: &str, operation: &str) -> Result<String, RuntimeError> {
    debug!("Running {:?}", command);
    let output = command
        .output()
        .await
        .map_err(|e| RuntimeError::new(service, operation, e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr
        };
        return Err(RuntimeError::new(service, operation, message));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn parse_state(raw: &str) -> ContainerState {
    let mut parts = raw.trim().split(';');
    let status = parts.next().unwrap_or_default();
    let exit_code = parts.next().and_then(|c| c.trim().parse().ok());
    match status {
        "running" => ContainerState::Running,
        "created" => ContainerState::Created,
        "exited" | "stopped" => ContainerState::Exited(exit_code),
        other => ContainerState::Unknown(other.to_string()),
    }
}

/// `"512.3MiB / 2GiB"` → bytes of the first figure.
fn parse_memory_usage(raw: &str) -> Option<u64> {
    let used = raw.split('/').next()?.trim();
    let split = used.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = used.split_at(split);
    let number: f64 = number.trim().parse().ok()?;
    let factor = match unit.trim() {
        "B" => 1.0,
        "KiB" | "kB" | "KB" => 1024.0,
        "MiB" | "MB" => 1024.0 * 1024.0,
        "GiB" | "GB" => 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((number * factor) as u64)
}

fn parse_stats(raw: &str) -> (Option<f32>, Option<u64>) {
    let mut parts = raw.trim().split(';');
    let cpu = parts
        .next()
        .and_then(|c| c.trim().trim_end_matches('%').parse().ok());
    let memory = parts.next().and_then(parse_memory_usage);
    (cpu, memory)
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn define_service(&self, spec: ServiceSpec) -> Result<(), RuntimeError> {
        let mut services = self.services.lock().await;
        services.insert(spec.name.clone(), ComposeService::from_spec(&self.network, &spec));
        self.write_compose(&services).await
    }

    async fn start(&self, service: &str) -> Result<(), RuntimeError> {
        info!("Starting service '{}'", service);
        self.compose(service, "start", &["up", "-d", service]).await?;
        Ok(())
    }

    async fn stop(&self, service: &str) -> Result<(), RuntimeError> {
        info!("Stopping service '{}'", service);
        self.compose(service, "stop", &["stop", service]).await?;
        Ok(())
    }

    async fn status(&self, service: &str) -> Result<ContainerStatus, RuntimeError> {
        let container = self.container_name(service).await;
        let state = match self
            .engine(
                service,
                "inspect",
                &["inspect", "--format", "{{.State.Status}};{{.State.ExitCode}}", &container],
            )
            .await
        {
            Ok(raw) => parse_state(&raw),
            Err(e) if e.message.to_lowercase().contains("no such") => {
                return Ok(ContainerStatus::new(service, ContainerState::Missing))
            }
            Err(e) => return Err(e),
        };

        let mut status = ContainerStatus::new(service, state);
        if status.state == ContainerState::Running {
            match self
                .engine(
                    service,
                    "stats",
                    &["stats", "--no-stream", "--format", "{{.CPUPerc}};{{.MemUsage}}", &container],
                )
                .await
            {
                Ok(raw) => {
                    let (cpu, memory) = parse_stats(&raw);
                    status.cpu_percent = cpu;
                    status.memory_bytes = memory;
                }
                Err(e) => debug!("No stats for '{}': {}", service, e),
            }
        }
        Ok(status)
    }

    async fn logs(&self, service: &str, tail: usize) -> Result<Vec<String>, RuntimeError> {
        let container = self.container_name(service).await;
        let tail = tail.to_string();
        let raw = self
            .engine(service, "logs", &["logs", "--tail", &tail, &container])
            .await?;
        Ok(raw.lines().map(str::to_string).collect())
    }

    async fn remove(&self, service: &str) -> Result<(), RuntimeError> {
        let container = self.container_name(service).await;
        match self.engine(service, "remove", &["rm", "-f", &container]).await {
            Ok(_) => {}
            Err(e) if e.message.to_lowercase().contains("no such") => {}
            Err(e) => return Err(e),
        }
        let mut services = self.services.lock().await;
        if services.remove(service).is_some() {
            self.write_compose(&services).await?;
        }
        Ok(())
    }

    async fn teardown(&self) -> Result<(), RuntimeError> {
        if !self.compose_path.exists() {
            warn!(
                "No compose file at {:?}; nothing to tear down",
                self.compose_path
            );
            return Ok(());
        }
        info!("Tearing down compose project '{}'", self.project);
        self.compose("*", "tear down", &["down"]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runtime::{PortBinding, VolumeMount};

    fn spec() -> ServiceSpec {
        ServiceSpec {
            name: "survival".into(),
            container_name: "demo-survival".into(),
            image: "eclipse-temurin:17-jre".into(),
            env: BTreeMap::from([("EULA".to_string(), "TRUE".to_string())]),
            ports: vec![PortBinding {
                host: 25566,
                container: 25565,
            }],
            volumes: vec![
                VolumeMount {
                    host: PathBuf::from("/srv/servers/survival/state"),
                    container: "/data".into(),
                    read_only: false,
                },
                VolumeMount {
                    host: PathBuf::from("/srv/servers/survival/config"),
                    container: "/config".into(),
                    read_only: true,
                },
            ],
            command: vec![],
            memory_mb: Some(2048),
            cpus: None,
        }
    }

    #[test]
    fn compose_document_shape() {
        let services = BTreeMap::from([("survival".to_string(), spec())]);
        let doc = ComposeFile::render("demo_net", &services);
        let yaml = serde_yaml::to_string(&doc).unwrap();
        assert!(yaml.contains("3.8"));
        assert!(yaml.contains("unless-stopped"));

        let service = &doc.services["survival"];
        assert_eq!(service.ports, vec!["25566:25565"]);
        assert_eq!(service.volumes[1], "/srv/servers/survival/config:/config:ro");
        assert_eq!(service.restart, "unless-stopped");
        assert_eq!(service.networks, vec!["demo_net"]);
        assert_eq!(service.mem_limit.as_deref(), Some("2048m"));
        assert_eq!(doc.networks["demo_net"].driver, "bridge");
        assert_eq!(doc.networks["demo_net"].name.as_deref(), Some("demo_net"));
    }

    #[test]
    fn shell_variables_survive_compose_interpolation() {
        let mut spec = spec();
        spec.command = vec!["sh".into(), "-c".into(), "rm -f \"/data/$f\"".into()];
        let service = ComposeService::from_spec("demo_net", &spec);
        assert_eq!(service.command[2], "rm -f \"/data/$$f\"");
    }

    #[tokio::test]
    async fn services_from_earlier_runs_stay_in_the_compose_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compose.yml");

        let first = ComposeRuntime::new(path.clone(), "Demo", "demo_net", RuntimeKind::Auto);
        let mut proxy = spec();
        proxy.name = "velocity".into();
        proxy.container_name = "demo-velocity".into();
        first.define_service(proxy).await.unwrap();
        first.define_service(spec()).await.unwrap();

        let second = ComposeRuntime::new(path.clone(), "Demo", "demo_net", RuntimeKind::Auto);
        let mut lobby = spec();
        lobby.name = "lobby".into();
        lobby.container_name = "demo-lobby".into();
        second.define_service(lobby).await.unwrap();

        let written: ComposeFile =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let names: Vec<_> = written.services.keys().cloned().collect();
        assert_eq!(names, vec!["lobby", "survival", "velocity"]);
        assert_eq!(second.container_name("velocity").await, "demo-velocity");
    }

    #[test]
    fn parses_engine_output() {
        assert_eq!(parse_state("running;0\n"), ContainerState::Running);
        assert_eq!(parse_state("exited;137"), ContainerState::Exited(Some(137)));
        assert_eq!(
            parse_stats("12.50%;512MiB / 2GiB"),
            (Some(12.5), Some(512 * 1024 * 1024))
        );
    }

    #[tokio::test]
    async fn teardown_without_compose_file_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = ComposeRuntime::new(
            dir.path().join("compose.yml"),
            "Demo",
            "demo_net",
            RuntimeKind::Auto,
        );
        runtime.teardown().await.unwrap();
    }
}

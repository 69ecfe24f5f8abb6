// ─── Command handlers ───
// Thin async wrappers the CLI calls into. Rendering stays in main.rs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::core::artifact::ArtifactCache;
use crate::core::config::{initialize, load_config, DEFAULT_CONFIG_FILENAME};
use crate::core::error::{LmcpError, LmcpResult};
use crate::core::extract::{ArtifactRegistry, ExtractionWarning, Extractor};
use crate::core::monitor::{MonitoringAggregator, MonitoringSnapshot};
use crate::core::orchestrator::{BuildReport, OperationReport, OrchestrationEngine};
use crate::core::runtime::ComposeRuntime;
use crate::core::state::Workspace;
use crate::core::template::{Template, TemplateResolver};

// ── Workspace ───────────────────────────────────────────

pub fn init_workspace(directory: &Path, project_name: Option<&str>) -> LmcpResult<PathBuf> {
    let project_name = match project_name {
        Some(name) => name.to_string(),
        None => directory
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "minecraft".to_string()),
    };
    let config_path = initialize(directory, &project_name)?;
    info!("Workspace '{}' ready at {:?}", project_name, directory);
    Ok(config_path)
}

/// Discover the workspace above `start` and wire an engine backed by the
/// compose runtime.
pub async fn open_engine(start: &Path) -> LmcpResult<OrchestrationEngine> {
    let workspace = Workspace::discover(start)?;
    let runtime = Arc::new(ComposeRuntime::new(
        workspace.compose_path(),
        &workspace.config.project_name,
        &workspace.config.container_env.network.name,
        workspace.config.container_env.runtime,
    ));
    OrchestrationEngine::open(&workspace, runtime).await
}

// ── Lifecycle ───────────────────────────────────────────

/// Build the named servers, or every active server when `servers` is empty.
pub async fn build(engine: &OrchestrationEngine, servers: &[String]) -> LmcpResult<BuildReport> {
    if servers.is_empty() {
        engine.build_all().await
    } else {
        engine.build_many(servers).await
    }
}

pub async fn up(engine: &OrchestrationEngine) -> LmcpResult<OperationReport> {
    engine.up().await
}

pub async fn down(engine: &OrchestrationEngine) -> LmcpResult<OperationReport> {
    engine.down().await
}

pub async fn remove(engine: &OrchestrationEngine, server: &str, purge: bool) -> LmcpResult<()> {
    engine.remove(server, purge).await
}

// ── Status ──────────────────────────────────────────────

pub async fn status(engine: &OrchestrationEngine, tail: usize) -> LmcpResult<MonitoringSnapshot> {
    let monitor = MonitoringAggregator::new(
        engine.runtime().clone(),
        engine.instance_manager().clone(),
        engine.logs().clone(),
    )
    .with_tail(tail);
    monitor.poll(engine.cluster()).await
}

/// Container output for `server`, or lmcp's own log when the runtime has
/// nothing to say.
pub async fn logs(engine: &OrchestrationEngine, server: &str, tail: usize) -> LmcpResult<Vec<String>> {
    if !engine.cluster().contains(server) {
        return Err(LmcpError::ServerNotFound(server.to_string()));
    }
    match engine.runtime().logs(server, tail).await {
        Ok(lines) if !lines.is_empty() => Ok(lines),
        Ok(_) => engine.logs().tail(server, tail).await,
        Err(e) => {
            warn!("{}", e);
            engine.logs().tail(server, tail).await
        }
    }
}

// ── Validation ──────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TemplateCheck {
    pub server: String,
    pub template: String,
    /// Empty when the template resolves cleanly.
    pub problems: Vec<String>,
}

/// Load `lmcp.yaml` and resolve every member's template without side effects.
pub fn validate(start: &Path) -> LmcpResult<Vec<TemplateCheck>> {
    let workspace = Workspace::discover(start)?;
    let cluster = workspace.cluster()?;
    let resolver = TemplateResolver::new(&cluster);

    let mut checks = Vec::new();
    for member in cluster.members() {
        let path = workspace.templates_dir().join(&member.template);
        let problems = match Template::load(&path) {
            Ok(template) => match resolver.resolve(&template, &member.name) {
                Ok(_) => Vec::new(),
                Err(e) => e.violations.iter().map(|v| v.to_string()).collect(),
            },
            Err(e) => vec![e.to_string()],
        };
        checks.push(TemplateCheck {
            server: member.name.clone(),
            template: member.template.clone(),
            problems,
        });
    }
    Ok(checks)
}

/// `lmcp.yaml` itself, without touching templates.
pub fn validate_config(path: &Path) -> LmcpResult<()> {
    let config = load_config(path)?;
    config.validate()?;
    Ok(())
}

// ── Extraction ──────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ExtractOutcome {
    pub path: PathBuf,
    pub template: Template,
    pub warnings: Vec<ExtractionWarning>,
}

/// Infer a template from `dir` and write it to `out`, or into the
/// workspace's templates directory when `out` is absent.
pub async fn extract(
    start: &Path,
    dir: &Path,
    out: Option<PathBuf>,
    overwrite: bool,
) -> LmcpResult<ExtractOutcome> {
    let workspace = match Workspace::discover(start) {
        Ok(ws) => Some(ws),
        Err(e) => {
            info!("Extracting outside a workspace ({}); registry is empty", e);
            None
        }
    };

    let registry = match &workspace {
        Some(ws) => {
            let registry = ArtifactRegistry::load(&ws.registry_path())?;
            match ArtifactCache::open(&ws.cache_dir()).await {
                Ok(cache) => registry.with_cache_entries(cache.entries().await),
                Err(e) => {
                    warn!("Artifact cache unavailable for identification: {}", e);
                    registry
                }
            }
        }
        None => ArtifactRegistry::default(),
    };

    let source_dir = dir.to_path_buf();
    let extraction = tokio::task::spawn_blocking(move || Extractor::new(&registry).extract(&source_dir))
        .await
        .map_err(|e| LmcpError::Other(format!("extraction task failed: {}", e)))??;

    let file_name = format!("{}.toml", extraction.template.name);
    let path = match (out, &workspace) {
        (Some(out), _) => out,
        (None, Some(ws)) => ws.templates_dir().join(file_name),
        (None, None) => PathBuf::from(file_name),
    };
    if path.exists() && !overwrite {
        return Err(LmcpError::Config(format!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        )));
    }
    extraction.template.save(&path)?;
    info!(
        "Wrote template '{}' to {:?} with {} warning(s)",
        extraction.template.name,
        path,
        extraction.warnings.len()
    );

    Ok(ExtractOutcome {
        path,
        template: extraction.template,
        warnings: extraction.warnings,
    })
}

// ── Pinning ─────────────────────────────────────────────

pub async fn pin(engine: &OrchestrationEngine, server: &str, file: &Path) -> LmcpResult<()> {
    engine.pin(server, file).await.map(|_| ())
}

pub async fn unpin(engine: &OrchestrationEngine, server: &str, file: &Path) -> LmcpResult<()> {
    engine.unpin(server, file).await.map(|_| ())
}

pub fn default_config_path(directory: &Path) -> PathBuf {
    directory.join(DEFAULT_CONFIG_FILENAME)
}

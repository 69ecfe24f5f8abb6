use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use super::report::{BuildReport, OperationReport};
use super::service::service_spec;
use crate::core::artifact::{ArtifactCache, ArtifactFetcher, CacheEntry, SourceRouter};
use crate::core::cluster::ClusterDefinition;
use crate::core::error::{LmcpError, LmcpResult};
use crate::core::http::build_http_client;
use crate::core::instance::{InstanceManager, LifecycleState, ServerInstance};
use crate::core::logs::ServerLogs;
use crate::core::network::{AllocationRequest, NetworkAllocation, NetworkAllocator};
use crate::core::runtime::ContainerRuntime;
use crate::core::state::Workspace;
use crate::core::synth::{
    ArtifactPlacement, ClusterView, CommitReport, ConfigSynthesizer, ConfigWriter,
};
use crate::core::template::{BuildPlan, PlannedArtifact, Template, TemplateResolver};

/// Collaborators of an [`OrchestrationEngine`].
pub struct EngineParts {
    pub cluster: ClusterDefinition,
    pub templates_dir: PathBuf,
    pub instances: InstanceManager,
    pub fetcher: ArtifactFetcher,
    pub allocator: NetworkAllocator,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub logs: ServerLogs,
    pub max_parallel_builds: usize,
}

/// Drives every server instance through its lifecycle.
///
/// Builds hold the read side of `gate`; `down` raises the cancel flag and
/// then takes the write side, so it only touches the runtime once every
/// in-flight build has either finished or backed out.
pub struct OrchestrationEngine {
    cluster: ClusterDefinition,
    templates_dir: PathBuf,
    instances: InstanceManager,
    fetcher: ArtifactFetcher,
    allocator: NetworkAllocator,
    runtime: Arc<dyn ContainerRuntime>,
    logs: ServerLogs,
    max_parallel_builds: usize,
    gate: RwLock<()>,
    build_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    cancel: watch::Sender<bool>,
}

impl OrchestrationEngine {
    pub fn new(parts: EngineParts) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            cluster: parts.cluster,
            templates_dir: parts.templates_dir,
            instances: parts.instances,
            fetcher: parts.fetcher,
            allocator: parts.allocator,
            runtime: parts.runtime,
            logs: parts.logs,
            max_parallel_builds: parts.max_parallel_builds.max(1),
            gate: RwLock::new(()),
            build_locks: std::sync::Mutex::new(HashMap::new()),
            cancel,
        }
    }

    /// Wire an engine for a workspace on disk: shared cache, persisted network
    /// table, HTTP/file artifact sources.
    pub async fn open(workspace: &Workspace, runtime: Arc<dyn ContainerRuntime>) -> LmcpResult<Self> {
        let cluster = workspace.cluster()?;
        let client = build_http_client()?;
        let cache = Arc::new(ArtifactCache::open(&workspace.cache_dir()).await?);
        let fetcher = ArtifactFetcher::new(cache, Arc::new(SourceRouter::new(client)))
            .with_max_parallel(workspace.config.build.max_parallel_downloads);
        let allocator = NetworkAllocator::open(
            workspace.network_table_path(),
            workspace.config.network.port_range_start,
            workspace.config.network.port_range_end,
        )?;

        Ok(Self::new(EngineParts {
            cluster,
            templates_dir: workspace.templates_dir(),
            instances: InstanceManager::new(workspace.servers_dir()),
            fetcher,
            allocator,
            runtime,
            logs: ServerLogs::new(workspace.logs_dir()),
            max_parallel_builds: workspace.config.build.max_parallel_builds,
        }))
    }

    pub fn cluster(&self) -> &ClusterDefinition {
        &self.cluster
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn logs(&self) -> &ServerLogs {
        &self.logs
    }

    pub fn allocator(&self) -> &NetworkAllocator {
        &self.allocator
    }

    pub fn instance_manager(&self) -> &InstanceManager {
        &self.instances
    }

    // ── Build ───────────────────────────────────────────

    /// Build one server: resolve, fetch, allocate, synthesize, commit.
    pub async fn build(&self, name: &str) -> LmcpResult<ServerInstance> {
        let _gate = self.gate.read().await;
        self.build_locked(name).await
    }

    /// Build every active server with bounded parallelism. One server's
    /// failure never stops the others; only cluster-fatal errors abort.
    pub async fn build_all(&self) -> LmcpResult<BuildReport> {
        let names: Vec<String> = self
            .cluster
            .active_members()
            .map(|m| m.name.clone())
            .collect();
        self.build_many(&names).await
    }

    pub async fn build_many(&self, names: &[String]) -> LmcpResult<BuildReport> {
        let _gate = self.gate.read().await;
        info!("Building {} server(s)", names.len());

        let results: Vec<(String, LmcpResult<ServerInstance>)> = stream::iter(names.iter().cloned())
            .map(|name| async move {
                let result = self.build_locked(&name).await;
                (name, result)
            })
            .buffer_unordered(self.max_parallel_builds)
            .collect()
            .await;

        let mut report = BuildReport::default();
        for (name, result) in results {
            match result {
                Ok(_) => report.succeed(&name),
                Err(e) if e.is_cluster_fatal() => {
                    error!("Cluster-fatal error while building '{}': {}", name, e);
                    return Err(e);
                }
                Err(e) => report.fail(&name, &e),
            }
        }

        if self.ensure_not_cancelled(self.cluster.proxy_name()).is_ok() {
            if let Err(e) = self.sync_proxy().await {
                warn!("Proxy config refresh failed: {}", e);
                report.fail(self.cluster.proxy_name(), &e);
            }
        }
        report.sort();
        Ok(report)
    }

    async fn build_locked(&self, name: &str) -> LmcpResult<ServerInstance> {
        let member = self
            .cluster
            .member(name)
            .ok_or_else(|| LmcpError::ServerNotFound(name.to_string()))?
            .clone();
        self.ensure_not_cancelled(name)?;

        let lock = self.build_lock(name);
        let _guard = lock.lock().await;

        let mut instance = match self.instances.try_load(name).await? {
            Some(instance) => instance,
            None => ServerInstance::new(
                name,
                member.role,
                &member.template,
                self.instances.servers_dir(),
            ),
        };
        instance.template = member.template.clone();
        if instance.state == LifecycleState::Building {
            // Left behind by a process that died mid-build.
            warn!("'{}' was still marked as building; treating it as failed", name);
            instance.fail("previous build was interrupted")?;
        }
        let prior_state = instance.state;
        let prior_error = instance.last_error.clone();

        instance.transition(LifecycleState::Building)?;
        self.instances.save(&instance).await?;
        self.log_event(name, "build started").await;

        match self.run_build(&instance).await {
            Ok(outcome) => {
                instance.template_hash = Some(outcome.plan.template_hash.clone());
                instance.core = Some(outcome.plan.core_kind);
                instance.image = Some(outcome.plan.image.clone());
                instance.resources = outcome.plan.resources.clone();
                instance.allocation = Some(outcome.allocation);
                instance.built_at = Some(Utc::now());
                instance.transition(LifecycleState::Built)?;
                self.instances.save(&instance).await?;
                self.log_event(
                    name,
                    &format!(
                        "build finished: {} file(s) written, {} preserved",
                        outcome.report.written.len(),
                        outcome.report.preserved.len()
                    ),
                )
                .await;
                info!("Built '{}'", name);
                Ok(instance)
            }
            Err(LmcpError::Cancelled(server)) => {
                instance.transition(prior_state)?;
                instance.last_error = prior_error;
                self.instances.save(&instance).await?;
                self.log_event(name, "build cancelled").await;
                warn!("Build of '{}' cancelled", name);
                Err(LmcpError::Cancelled(server))
            }
            Err(e) => {
                instance.fail(&e.to_string())?;
                self.instances.save(&instance).await?;
                self.log_event(name, &format!("build failed: {}", e)).await;
                error!("Build of '{}' failed: {}", name, e);
                Err(e)
            }
        }
    }

    #[instrument(skip(self, instance), fields(server = %instance.name))]
    async fn run_build(&self, instance: &ServerInstance) -> LmcpResult<BuildOutcome> {
        let template = self.load_template(&instance.template).await?;
        let plan = TemplateResolver::new(&self.cluster).resolve(&template, &instance.name)?;
        debug!(
            "Resolved plan for '{}': {} artifact(s)",
            plan.server,
            plan.artifacts.len() + 1
        );

        let entries = self.fetch(&plan).await?;
        self.ensure_not_cancelled(&plan.server)?;

        let allocation = self
            .allocator
            .allocate(&self.cluster, &AllocationRequest::from_plan(&plan))
            .await?;

        let report = self
            .synthesize_and_commit(instance, &plan, &entries, &allocation)
            .await?;

        Ok(BuildOutcome {
            plan,
            allocation,
            report,
        })
    }

    async fn load_template(&self, file: &str) -> LmcpResult<Template> {
        let path = self.templates_dir.join(file);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| LmcpError::io(&path, source))?;
        Template::from_toml(&raw)
    }

    /// Fetch every artifact of the plan, giving up as soon as `down` asks.
    async fn fetch(&self, plan: &BuildPlan) -> LmcpResult<Vec<(PlannedArtifact, CacheEntry)>> {
        let artifacts: Vec<PlannedArtifact> = plan.all_artifacts().cloned().collect();
        let cancel = self.cancel.subscribe();

        let entries = tokio::select! {
            result = self.fetcher.resolve_all(&artifacts) => result?,
            _ = cancelled(cancel) => {
                return Err(LmcpError::Cancelled(plan.server.clone()));
            }
        };
        Ok(artifacts.into_iter().zip(entries).collect())
    }

    /// Synthesis runs against the allocation snapshot taken after this
    /// server's own allocation is final.
    async fn synthesize_and_commit(
        &self,
        instance: &ServerInstance,
        plan: &BuildPlan,
        entries: &[(PlannedArtifact, CacheEntry)],
        allocation: &NetworkAllocation,
    ) -> LmcpResult<CommitReport> {
        let snapshot = self.allocator.snapshot().await;
        let view = ClusterView::new(&self.cluster, &snapshot);
        let set = ConfigSynthesizer::synthesize(plan, allocation, view, Some(instance))?;

        let placements: Vec<ArtifactPlacement> = entries
            .iter()
            .map(|(artifact, entry)| ArtifactPlacement {
                placement: artifact.placement.clone(),
                blob: self.fetcher.cache().blob_path(&entry.digest),
                digest: entry.digest.clone(),
            })
            .collect();

        self.instances.ensure_layout(instance).await?;
        self.ensure_not_cancelled(&plan.server)?;

        let server_dir = instance.path.clone();
        tokio::task::spawn_blocking(move || ConfigWriter::commit(&server_dir, &set, &placements))
            .await
            .map_err(|e| LmcpError::Other(format!("config commit task failed: {}", e)))?
    }

    /// Re-synthesize the proxy's config from the current allocation table so
    /// its backend list covers every allocated backend before anything
    /// starts. Skipped while the proxy is unbuilt or its template changed
    /// since the last build.
    async fn sync_proxy(&self) -> LmcpResult<()> {
        let proxy = self.cluster.proxy_name().to_string();
        let lock = self.build_lock(&proxy);
        let _guard = lock.lock().await;

        let instance = match self.instances.try_load(&proxy).await? {
            Some(instance) if instance.built_at.is_some() => instance,
            _ => return Ok(()),
        };

        let template = self.load_template(&instance.template).await?;
        let plan = TemplateResolver::new(&self.cluster).resolve(&template, &proxy)?;
        if instance.template_hash.as_deref() != Some(plan.template_hash.as_str()) {
            warn!(
                "Template of proxy '{}' changed since its last build; rebuild it to apply",
                proxy
            );
            return Ok(());
        }

        let entries = self.fetch(&plan).await?;
        let allocation = self
            .allocator
            .allocate(&self.cluster, &AllocationRequest::from_plan(&plan))
            .await?;
        self.synthesize_and_commit(&instance, &plan, &entries, &allocation)
            .await?;
        debug!("Refreshed proxy config for '{}'", proxy);
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────────

    /// Build what was never built, refresh the proxy's backend list, then
    /// start every active server in configured order.
    pub async fn up(&self) -> LmcpResult<OperationReport> {
        let _gate = self.gate.read().await;
        let sequence = self.cluster.start_sequence();
        let mut report = OperationReport::default();

        for name in &sequence {
            let built = matches!(
                self.instances.try_load(name).await?,
                Some(instance) if instance.built_at.is_some()
            );
            if built {
                continue;
            }
            match self.build_locked(name).await {
                Ok(_) => {}
                Err(e) if e.is_cluster_fatal() => return Err(e),
                Err(e) => report.fail(name, &e),
            }
        }

        if let Err(e) = self.sync_proxy().await {
            warn!("Proxy config refresh failed: {}", e);
            report.fail(self.cluster.proxy_name(), &e);
        }

        for name in &sequence {
            if report.has_failed(name) {
                continue;
            }
            if self.ensure_not_cancelled(name).is_err() {
                warn!("Start sequence interrupted by shutdown");
                break;
            }
            match self.start(name).await {
                Ok(()) => report.succeed(name),
                Err(e) => report.fail(name, &e),
            }
        }
        report.sort();
        Ok(report)
    }

    async fn start(&self, name: &str) -> LmcpResult<()> {
        let lock = self.build_lock(name);
        let _guard = lock.lock().await;

        let mut instance = self.instances.load(name).await?;
        if instance.state == LifecycleState::Running {
            debug!("'{}' is already running", name);
            return Ok(());
        }
        let spec = service_spec(&self.cluster, &instance)?;

        instance.transition(LifecycleState::Starting)?;
        self.instances.save(&instance).await?;
        self.log_event(name, "starting").await;

        let started = match self.runtime.define_service(spec).await {
            Ok(()) => self.runtime.start(name).await,
            Err(e) => Err(e),
        };
        match started {
            Ok(()) => {
                instance.transition(LifecycleState::Running)?;
                self.instances.save(&instance).await?;
                self.log_event(name, "running").await;
                info!("Started '{}'", name);
                Ok(())
            }
            Err(e) => {
                let e = LmcpError::from(e);
                instance.fail(&e.to_string())?;
                self.instances.save(&instance).await?;
                self.log_event(name, &format!("start failed: {}", e)).await;
                error!("Failed to start '{}': {}", name, e);
                Err(e)
            }
        }
    }

    /// Stop every live server in reverse start order and tear down the
    /// runtime's metadata. In-flight builds are cancelled first. Server
    /// directories are left alone.
    pub async fn down(&self) -> LmcpResult<OperationReport> {
        self.cancel.send_replace(true);
        info!("Shutting down cluster '{}'", self.cluster.project);
        let result = {
            let _gate = self.gate.write().await;
            self.stop_all().await
        };
        self.cancel.send_replace(false);
        result
    }

    async fn stop_all(&self) -> LmcpResult<OperationReport> {
        let mut order: Vec<String> = self.cluster.start_sequence();
        order.reverse();
        for instance in self.instances.list().await? {
            if !order.contains(&instance.name) {
                order.push(instance.name);
            }
        }

        let mut report = OperationReport::default();
        for name in &order {
            let mut instance = match self.instances.try_load(name).await? {
                Some(instance) => instance,
                None => continue,
            };
            if instance.state != LifecycleState::Running {
                continue;
            }

            instance.transition(LifecycleState::Stopping)?;
            self.instances.save(&instance).await?;
            self.log_event(name, "stopping").await;

            match self.runtime.stop(name).await {
                Ok(()) => {
                    instance.transition(LifecycleState::Stopped)?;
                    self.instances.save(&instance).await?;
                    self.log_event(name, "stopped").await;
                    report.succeed(name);
                }
                Err(e) => {
                    let e = LmcpError::from(e);
                    instance.fail(&e.to_string())?;
                    self.instances.save(&instance).await?;
                    self.log_event(name, &format!("stop failed: {}", e)).await;
                    error!("Failed to stop '{}': {}", name, e);
                    report.fail(name, &e);
                }
            }
        }

        if let Err(e) = self.runtime.teardown().await {
            let e = LmcpError::from(e);
            error!("Runtime teardown failed: {}", e);
            report.fail(&self.cluster.project, &e);
        }
        report.sort();
        Ok(report)
    }

    /// Remove a server's container, release its network slot and delete its
    /// directory. `state/` survives unless `purge_state` is set.
    pub async fn remove(&self, name: &str, purge_state: bool) -> LmcpResult<()> {
        let _gate = self.gate.read().await;
        let lock = self.build_lock(name);
        let _guard = lock.lock().await;

        let mut instance = self.instances.load(name).await?;
        if !instance.state.can_transition_to(LifecycleState::Removing) {
            return Err(LmcpError::InvalidTransition {
                server: name.to_string(),
                from: instance.state,
                to: LifecycleState::Removing,
            });
        }

        // Runtime first: a failure here leaves the instance as it was.
        self.runtime.remove(name).await?;

        instance.transition(LifecycleState::Removing)?;
        self.instances.save(&instance).await?;
        self.log_event(name, "removing").await;

        if let Some(released) = self.allocator.release(name).await? {
            debug!("Released ports {:?} of '{}'", released.ports, name);
        }
        self.instances.delete(name, purge_state).await?;
        self.log_event(name, "removed").await;
        info!("Removed '{}'", name);
        Ok(())
    }

    /// Every cluster member, built or not, plus instances left over from
    /// servers no longer in the cluster.
    pub async fn instances(&self) -> LmcpResult<Vec<ServerInstance>> {
        let mut on_disk: HashMap<String, ServerInstance> = self
            .instances
            .list()
            .await?
            .into_iter()
            .map(|i| (i.name.clone(), i))
            .collect();

        let mut result: Vec<ServerInstance> = self
            .cluster
            .members()
            .map(|member| {
                on_disk.remove(&member.name).unwrap_or_else(|| {
                    ServerInstance::new(
                        &member.name,
                        member.role,
                        &member.template,
                        self.instances.servers_dir(),
                    )
                })
            })
            .collect();
        result.extend(on_disk.into_values());
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    pub async fn instance(&self, name: &str) -> LmcpResult<ServerInstance> {
        self.instances.load(name).await
    }

    // ── Pinning ─────────────────────────────────────────

    /// Exclude a config file (relative to `config/`) from future overwrites.
    pub async fn pin(&self, name: &str, file: &Path) -> LmcpResult<ServerInstance> {
        self.set_pinned(name, file, true).await
    }

    pub async fn unpin(&self, name: &str, file: &Path) -> LmcpResult<ServerInstance> {
        self.set_pinned(name, file, false).await
    }

    async fn set_pinned(&self, name: &str, file: &Path, pinned: bool) -> LmcpResult<ServerInstance> {
        if file.is_absolute() || file.components().any(|c| c.as_os_str() == "..") {
            return Err(LmcpError::Other(format!(
                "{} must be a path inside the server's config directory",
                file.display()
            )));
        }
        let lock = self.build_lock(name);
        let _guard = lock.lock().await;

        let mut instance = self.instances.load(name).await?;
        let changed = if pinned {
            instance.pinned_files.insert(file.to_path_buf())
        } else {
            instance.pinned_files.remove(file)
        };
        if changed {
            instance.updated_at = Utc::now();
            self.instances.save(&instance).await?;
            let verb = if pinned { "pinned" } else { "unpinned" };
            self.log_event(name, &format!("{} {}", verb, file.display()))
                .await;
        }
        Ok(instance)
    }

    // ── Helpers ─────────────────────────────────────────

    fn build_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.build_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    fn ensure_not_cancelled(&self, server: &str) -> LmcpResult<()> {
        if *self.cancel.borrow() {
            return Err(LmcpError::Cancelled(server.to_string()));
        }
        Ok(())
    }

    /// Per-server log file; a failing write is reported but never fails the
    /// operation it describes.
    async fn log_event(&self, server: &str, message: &str) {
        if let Err(e) = self.logs.append(server, message).await {
            warn!("Cannot write log for '{}': {}", server, e);
        }
    }
}

/// Resolves once the cancel flag is raised.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        let raised = *rx.borrow_and_update();
        if raised {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

struct BuildOutcome {
    plan: BuildPlan,
    allocation: NetworkAllocation,
    report: CommitReport,
}

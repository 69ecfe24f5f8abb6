use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use sysinfo::System;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::model::{HostMetrics, MonitoringSnapshot, RuntimeStatus, ServerStatusSnapshot};
use crate::core::cluster::{ClusterDefinition, ClusterMember};
use crate::core::error::LmcpResult;
use crate::core::instance::{InstanceManager, LifecycleState};
use crate::core::logs::ServerLogs;
use crate::core::runtime::ContainerRuntime;

pub const DEFAULT_LOG_TAIL: usize = 20;

/// Polls the runtime and the instance store into [`MonitoringSnapshot`]s.
/// Read-only: never changes lifecycle state.
pub struct MonitoringAggregator {
    runtime: Arc<dyn ContainerRuntime>,
    instances: InstanceManager,
    logs: ServerLogs,
    tail: usize,
    system: Mutex<System>,
}

impl MonitoringAggregator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, instances: InstanceManager, logs: ServerLogs) -> Self {
        Self {
            runtime,
            instances,
            logs,
            tail: DEFAULT_LOG_TAIL,
            system: Mutex::new(System::new()),
        }
    }

    pub fn with_tail(mut self, tail: usize) -> Self {
        self.tail = tail;
        self
    }

    pub async fn poll(&self, cluster: &ClusterDefinition) -> LmcpResult<MonitoringSnapshot> {
        let servers = join_all(cluster.members().map(|member| self.server_status(member))).await;
        let servers = servers.into_iter().collect::<LmcpResult<Vec<_>>>()?;
        let host = self.host_metrics().await;
        debug!("Polled {} server(s)", servers.len());
        Ok(MonitoringSnapshot {
            servers,
            host,
            taken_at: Utc::now(),
        })
    }

    async fn server_status(&self, member: &ClusterMember) -> LmcpResult<ServerStatusSnapshot> {
        let instance = self.instances.try_load(&member.name).await?;
        let (lifecycle, port, last_error) = match &instance {
            Some(i) => (
                i.state,
                i.allocation.as_ref().and_then(|a| a.primary_port()),
                i.last_error.clone(),
            ),
            None => (LifecycleState::Unbuilt, None, None),
        };

        let (runtime, cpu_percent, memory_bytes) = match self.runtime.status(&member.name).await {
            Ok(status) => (
                RuntimeStatus::from(status.state),
                status.cpu_percent,
                status.memory_bytes,
            ),
            Err(e) => (RuntimeStatus::Unknown(e.message), None, None),
        };

        let log_tail = self.log_tail(&member.name, &runtime).await;

        Ok(ServerStatusSnapshot {
            name: member.name.clone(),
            role: member.role,
            lifecycle,
            runtime,
            port,
            cpu_percent,
            memory_bytes,
            last_error,
            log_tail,
        })
    }

    /// Container output when there is a container, else lmcp's own log.
    async fn log_tail(&self, server: &str, runtime: &RuntimeStatus) -> Vec<String> {
        if matches!(
            runtime,
            RuntimeStatus::Running | RuntimeStatus::Exited(_) | RuntimeStatus::Created
        ) {
            match self.runtime.logs(server, self.tail).await {
                Ok(lines) => return lines,
                Err(e) => debug!("No container logs for '{}': {}", server, e),
            }
        }
        match self.logs.tail(server, self.tail).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Cannot read log file of '{}': {}", server, e);
                Vec::new()
            }
        }
    }

    async fn host_metrics(&self) -> HostMetrics {
        let mut system = self.system.lock().await;
        system.refresh_memory();
        system.refresh_cpu_usage();
        HostMetrics {
            cpu_percent: system.global_cpu_usage(),
            cpu_count: system.cpus().len(),
            memory_used_bytes: system.used_memory(),
            memory_total_bytes: system.total_memory(),
        }
    }

    /// Poll every `interval` and push snapshots until the receiver is
    /// dropped. A failed poll is logged and skipped.
    pub fn watch(
        self: Arc<Self>,
        cluster: Arc<ClusterDefinition>,
        interval: Duration,
    ) -> (mpsc::Receiver<MonitoringSnapshot>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match self.poll(&cluster).await {
                    Ok(snapshot) => {
                        if tx.send(snapshot).await.is_err() {
                            debug!("Monitor receiver dropped; stopping");
                            break;
                        }
                    }
                    Err(e) => warn!("Monitoring poll failed: {}", e),
                }
            }
        });
        (rx, handle)
    }
}

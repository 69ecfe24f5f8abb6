use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::cluster::ServerRole;
use crate::core::instance::LifecycleState;
use crate::core::runtime::ContainerState;

/// Container state as seen by the monitor. `Unknown` carries the reason the
/// runtime could not be asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RuntimeStatus {
    Running,
    Created,
    Exited(Option<i32>),
    NotCreated,
    Unknown(String),
}

impl From<ContainerState> for RuntimeStatus {
    fn from(state: ContainerState) -> Self {
        match state {
            ContainerState::Running => RuntimeStatus::Running,
            ContainerState::Created => RuntimeStatus::Created,
            ContainerState::Exited(code) => RuntimeStatus::Exited(code),
            ContainerState::Missing => RuntimeStatus::NotCreated,
            ContainerState::Unknown(raw) => RuntimeStatus::Unknown(raw),
        }
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeStatus::Running => write!(f, "running"),
            RuntimeStatus::Created => write!(f, "created"),
            RuntimeStatus::Exited(Some(code)) => write!(f, "exited ({})", code),
            RuntimeStatus::Exited(None) => write!(f, "exited"),
            RuntimeStatus::NotCreated => write!(f, "no container"),
            RuntimeStatus::Unknown(reason) => write!(f, "unknown ({})", reason),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStatusSnapshot {
    pub name: String,
    pub role: ServerRole,
    pub lifecycle: LifecycleState,
    pub runtime: RuntimeStatus,
    pub port: Option<u16>,
    pub cpu_percent: Option<f32>,
    pub memory_bytes: Option<u64>,
    pub last_error: Option<String>,
    pub log_tail: Vec<String>,
}

impl ServerStatusSnapshot {
    /// The lifecycle says running but the container does not.
    pub fn is_diverged(&self) -> bool {
        self.lifecycle == LifecycleState::Running && self.runtime != RuntimeStatus::Running
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HostMetrics {
    pub cpu_percent: f32,
    pub cpu_count: usize,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

/// One display cycle's worth of state. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringSnapshot {
    pub servers: Vec<ServerStatusSnapshot>,
    pub host: HostMetrics,
    pub taken_at: DateTime<Utc>,
}

impl MonitoringSnapshot {
    pub fn server(&self, name: &str) -> Option<&ServerStatusSnapshot> {
        self.servers.iter().find(|s| s.name == name)
    }
}

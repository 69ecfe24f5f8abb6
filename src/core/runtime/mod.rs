// ─── Container runtime contract ───
// The orchestration engine and the monitor depend only on this trait, never
// on a runtime's wire format.

pub mod compose;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::RuntimeError;

pub use compose::{ComposeRuntime, ComposeTool};
pub use memory::{MemoryRuntime, RuntimeCall};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host: u16,
    pub container: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

/// Everything the runtime needs to define one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Server name; the service key.
    pub name: String,
    pub container_name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub volumes: Vec<VolumeMount>,
    pub command: Vec<String>,
    pub memory_mb: Option<u32>,
    pub cpus: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ContainerState {
    Running,
    Created,
    Exited(Option<i32>),
    /// No container exists for the service.
    Missing,
    Unknown(String),
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Running => write!(f, "running"),
            ContainerState::Created => write!(f, "created"),
            ContainerState::Exited(Some(code)) => write!(f, "exited ({})", code),
            ContainerState::Exited(None) => write!(f, "exited"),
            ContainerState::Missing => write!(f, "missing"),
            ContainerState::Unknown(reason) => write!(f, "unknown: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub service: String,
    pub state: ContainerState,
    pub cpu_percent: Option<f32>,
    pub memory_bytes: Option<u64>,
}

impl ContainerStatus {
    pub fn new(service: &str, state: ContainerState) -> Self {
        Self {
            service: service.to_string(),
            state,
            cpu_percent: None,
            memory_bytes: None,
        }
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn define_service(&self, spec: ServiceSpec) -> Result<(), RuntimeError>;
    async fn start(&self, service: &str) -> Result<(), RuntimeError>;
    async fn stop(&self, service: &str) -> Result<(), RuntimeError>;
    async fn status(&self, service: &str) -> Result<ContainerStatus, RuntimeError>;
    /// Last `tail` log lines, oldest first.
    async fn logs(&self, service: &str, tail: usize) -> Result<Vec<String>, RuntimeError>;
    async fn remove(&self, service: &str) -> Result<(), RuntimeError>;
    /// Drop orchestration metadata (networks, compose project). Never touches
    /// server directories.
    async fn teardown(&self) -> Result<(), RuntimeError>;
}

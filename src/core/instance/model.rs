use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::cluster::ServerRole;
use crate::core::error::{LmcpError, LmcpResult};
use crate::core::network::NetworkAllocation;
use crate::core::template::{CoreKind, ResourceLimits};

/// Lifecycle of a server instance.
///
/// ```text
/// Unbuilt -> Building -> Built -> Starting -> Running -> Stopping -> Stopped
///               |                    |                      |
///               +------> Error <-----+----------------------+
/// Built | Stopped | Error -> Removing -> (deleted)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Unbuilt,
    Building,
    Built,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Removing,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match self {
            Unbuilt => matches!(next, Building | Removing),
            // A cancelled build returns to whatever state it started from.
            Building => matches!(next, Built | Error | Unbuilt | Stopped),
            Built => matches!(next, Building | Starting | Removing),
            Starting => matches!(next, Running | Error),
            Running => matches!(next, Stopping),
            Stopping => matches!(next, Stopped | Error),
            Stopped => matches!(next, Starting | Building | Removing),
            Error => matches!(next, Building | Starting | Stopping | Stopped | Removing),
            Removing => false,
        }
    }

    /// States in which the container may be up.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            LifecycleState::Starting | LifecycleState::Running | LifecycleState::Stopping
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unbuilt => "unbuilt",
            LifecycleState::Building => "building",
            LifecycleState::Built => "built",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Error => "error",
            LifecycleState::Removing => "removing",
        };
        f.write_str(name)
    }
}

/// A built, runnable server persisted as `<servers_dir>/<name>/instance.json`.
///
/// Each instance folder contains:
/// - `config/`: owned by the config synthesizer, swapped atomically
/// - `state/`: world and player data, owned by the running server
/// - `instance.json`: this serialized struct
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerInstance {
    pub name: String,
    pub role: ServerRole,
    pub path: PathBuf,
    /// Template file the instance was built from.
    pub template: String,
    /// Content hash of that template at build time.
    pub template_hash: Option<String>,
    pub core: Option<CoreKind>,
    pub state: LifecycleState,
    pub last_error: Option<String>,
    pub allocation: Option<NetworkAllocation>,
    pub image: Option<String>,
    #[serde(default)]
    pub resources: ResourceLimits,
    /// Config files (relative to `config/`) the synthesizer must not overwrite.
    #[serde(default)]
    pub pinned_files: BTreeSet<PathBuf>,
    pub built_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ServerInstance {
    pub fn new(name: &str, role: ServerRole, template: &str, servers_dir: &Path) -> Self {
        Self {
            name: name.to_string(),
            role,
            path: servers_dir.join(name),
            template: template.to_string(),
            template_hash: None,
            core: None,
            state: LifecycleState::Unbuilt,
            last_error: None,
            allocation: None,
            image: None,
            resources: ResourceLimits::default(),
            pinned_files: BTreeSet::new(),
            built_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.path.join("config")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.path.join("state")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.path.join("instance.json")
    }

    /// Move to `next`, rejecting edges outside the lifecycle graph.
    pub fn transition(&mut self, next: LifecycleState) -> LmcpResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(LmcpError::InvalidTransition {
                server: self.name.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next != LifecycleState::Error {
            self.last_error = None;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to `Error`, recording the cause verbatim.
    pub fn fail(&mut self, cause: &str) -> LmcpResult<()> {
        self.transition(LifecycleState::Error)?;
        self.last_error = Some(cause.to_string());
        Ok(())
    }
}

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::{AllocationError, LmcpError, LmcpResult};
use crate::core::template::BuildPlan;

/// Network identity of one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAllocation {
    pub server: String,
    /// Public host ports, mapped onto the container's game port.
    pub ports: Vec<u16>,
    /// Modern-forwarding secret shared with the proxy. Backends only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarding_secret: Option<String>,
    /// Name other containers reach this server by.
    pub hostname: String,
    /// Port came from `lmcp.yaml` rather than the range.
    #[serde(default)]
    pub fixed: bool,
    pub allocated_at: DateTime<Utc>,
}

impl NetworkAllocation {
    pub fn primary_port(&self) -> Option<u16> {
        self.ports.first().copied()
    }
}

/// Ports and secret of a removed server, kept until the range runs dry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasedSlot {
    pub server: String,
    pub ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarding_secret: Option<String>,
    pub released_at: DateTime<Utc>,
}

/// What a build asks of the allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub server: String,
    pub ports: u8,
    pub needs_forwarding_secret: bool,
    pub preferred_port: Option<u16>,
}

impl AllocationRequest {
    pub fn from_plan(plan: &BuildPlan) -> Self {
        Self {
            server: plan.server.clone(),
            ports: plan.network.ports.max(1),
            needs_forwarding_secret: plan.network.needs_forwarding_secret,
            preferred_port: plan.network.preferred_port,
        }
    }
}

/// The cluster-wide allocation table, persisted as `network.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTable {
    pub range_start: u16,
    pub range_end: u16,
    #[serde(default)]
    pub allocations: BTreeMap<String, NetworkAllocation>,
    /// Oldest release first.
    #[serde(default)]
    pub released: VecDeque<ReleasedSlot>,
}

impl NetworkTable {
    pub fn new(range_start: u16, range_end: u16) -> Self {
        Self {
            range_start,
            range_end,
            allocations: BTreeMap::new(),
            released: VecDeque::new(),
        }
    }

    /// Load a table; a missing file yields an empty one. An unreadable or
    /// inconsistent table is [`AllocationError::CorruptTable`].
    pub fn load(path: &Path, range_start: u16, range_end: u16) -> LmcpResult<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::new(range_start, range_end))
            }
            Err(source) => return Err(LmcpError::io(path, source)),
        };
        let mut table: NetworkTable = serde_json::from_str(&raw).map_err(|e| {
            AllocationError::CorruptTable(format!("{}: {}", path.display(), e))
        })?;
        table.range_start = range_start;
        table.range_end = range_end;
        table.verify()?;
        Ok(table)
    }

    /// Atomic write: temp file next to the target, then rename.
    pub fn save(&self, path: &Path) -> LmcpResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LmcpError::io(parent, source))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4()));
        std::fs::write(&tmp, json).map_err(|source| LmcpError::io(&tmp, source))?;
        std::fs::rename(&tmp, path).map_err(|source| LmcpError::io(path, source))
    }

    /// Ports unique across the cluster, range ports inside the range,
    /// secrets unique, entries keyed by their own server name.
    pub fn verify(&self) -> Result<(), AllocationError> {
        let mut ports: BTreeMap<u16, &str> = BTreeMap::new();
        let mut secrets = BTreeSet::new();

        for (key, allocation) in &self.allocations {
            if key != &allocation.server {
                return Err(AllocationError::CorruptTable(format!(
                    "entry '{}' describes server '{}'",
                    key, allocation.server
                )));
            }
            for port in &allocation.ports {
                if let Some(holder) = ports.insert(*port, &allocation.server) {
                    return Err(AllocationError::CorruptTable(format!(
                        "port {} is assigned to both '{}' and '{}'",
                        port, holder, allocation.server
                    )));
                }
                if !allocation.fixed && !self.in_range(*port) {
                    return Err(AllocationError::CorruptTable(format!(
                        "port {} of '{}' is outside {}-{}",
                        port, allocation.server, self.range_start, self.range_end
                    )));
                }
            }
            if let Some(secret) = &allocation.forwarding_secret {
                if !secrets.insert(secret.as_str()) {
                    return Err(AllocationError::CorruptTable(format!(
                        "forwarding secret of '{}' is shared with another server",
                        allocation.server
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn in_range(&self, port: u16) -> bool {
        (self.range_start..=self.range_end).contains(&port)
    }

    /// Active holder of `port`.
    pub fn holder_of(&self, port: u16) -> Option<&str> {
        self.allocations
            .values()
            .find(|a| a.ports.contains(&port))
            .map(|a| a.server.as_str())
    }

    pub fn is_released(&self, port: u16) -> bool {
        self.released.iter().any(|slot| slot.ports.contains(&port))
    }

    pub fn secret_in_use(&self, secret: &str) -> bool {
        self.allocations
            .values()
            .filter_map(|a| a.forwarding_secret.as_deref())
            .chain(
                self.released
                    .iter()
                    .filter_map(|s| s.forwarding_secret.as_deref()),
            )
            .any(|s| s == secret)
    }
}

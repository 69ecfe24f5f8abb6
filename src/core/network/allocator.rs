use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::model::{AllocationRequest, NetworkAllocation, NetworkTable, ReleasedSlot};
use crate::core::cluster::ClusterDefinition;
use crate::core::error::{AllocationError, LmcpResult};

const SECRET_BYTES: usize = 32;

/// The cluster's single allocation authority. Scan-and-reserve happens under
/// one lock, so concurrent builds never receive the same port.
pub struct NetworkAllocator {
    table: Mutex<NetworkTable>,
    path: Option<PathBuf>,
}

impl NetworkAllocator {
    /// Table kept in memory only.
    pub fn in_memory(range_start: u16, range_end: u16) -> Self {
        Self {
            table: Mutex::new(NetworkTable::new(range_start, range_end)),
            path: None,
        }
    }

    /// Adopt a table built elsewhere. It is verified before every allocation,
    /// not here.
    pub fn from_table(table: NetworkTable, path: Option<PathBuf>) -> Self {
        Self {
            table: Mutex::new(table),
            path,
        }
    }

    /// Table persisted at `path` after every change.
    pub fn open(path: PathBuf, range_start: u16, range_end: u16) -> LmcpResult<Self> {
        let table = NetworkTable::load(&path, range_start, range_end)?;
        debug!(
            "Loaded network table from {:?} ({} allocations)",
            path,
            table.allocations.len()
        );
        Ok(Self {
            table: Mutex::new(table),
            path: Some(path),
        })
    }

    /// Allocation for `request.server`, creating one if needed.
    ///
    /// Idempotent: a server that already holds an allocation gets it back
    /// unchanged unless the request needs something it lacks.
    #[instrument(skip(self, cluster, request), fields(server = %request.server))]
    pub async fn allocate(
        &self,
        cluster: &ClusterDefinition,
        request: &AllocationRequest,
    ) -> LmcpResult<NetworkAllocation> {
        if !cluster.contains(&request.server) {
            return Err(AllocationError::UnknownServer(request.server.clone()).into());
        }

        let mut table = self.table.lock().await;
        table.verify()?;
        let before = table.clone();

        let existing = table.allocations.get(&request.server).cloned();
        let outcome = match &existing {
            Some(existing) => Self::reconcile(&mut table, existing.clone(), request),
            None => Self::reserve_ports(&mut table, request).map(|ports| NetworkAllocation {
                server: request.server.clone(),
                ports,
                forwarding_secret: request
                    .needs_forwarding_secret
                    .then(|| Self::fresh_secret(&table)),
                hostname: cluster.container_name(&request.server),
                fixed: request.preferred_port.is_some(),
                allocated_at: Utc::now(),
            }),
        };
        let allocation = match outcome {
            Ok(allocation) => allocation,
            Err(e) => {
                *table = before;
                return Err(e.into());
            }
        };
        if existing.as_ref() == Some(&allocation) {
            return Ok(allocation);
        }

        table
            .allocations
            .insert(request.server.clone(), allocation.clone());
        if let Err(e) = self.persist(&table) {
            *table = before;
            return Err(e);
        }

        info!(
            "Allocated ports {:?} to '{}'",
            allocation.ports, allocation.server
        );
        Ok(allocation)
    }

    /// Adjust an existing allocation to a changed request: a new fixed port,
    /// a newly required secret, or more ports.
    fn reconcile(
        table: &mut NetworkTable,
        mut existing: NetworkAllocation,
        request: &AllocationRequest,
    ) -> Result<NetworkAllocation, AllocationError> {
        if let Some(port) = request.preferred_port {
            if existing.primary_port() != Some(port) {
                Self::claim_fixed(table, &request.server, port)?;
                existing.ports = vec![port];
                existing.fixed = true;
            }
        }
        while existing.ports.len() < request.ports as usize {
            let port = Self::next_free_port(table, &request.server, &existing.ports)?;
            existing.ports.push(port);
        }
        if request.needs_forwarding_secret && existing.forwarding_secret.is_none() {
            existing.forwarding_secret = Some(Self::fresh_secret(table));
        }
        Ok(existing)
    }

    fn reserve_ports(
        table: &mut NetworkTable,
        request: &AllocationRequest,
    ) -> Result<Vec<u16>, AllocationError> {
        let mut ports = Vec::new();
        if let Some(port) = request.preferred_port {
            Self::claim_fixed(table, &request.server, port)?;
            ports.push(port);
        }
        while ports.len() < request.ports as usize {
            let port = Self::next_free_port(table, &request.server, &ports)?;
            ports.push(port);
        }
        Ok(ports)
    }

    fn claim_fixed(
        table: &mut NetworkTable,
        server: &str,
        port: u16,
    ) -> Result<(), AllocationError> {
        if let Some(holder) = table.holder_of(port) {
            if holder != server {
                return Err(AllocationError::PortConflict {
                    server: server.to_string(),
                    port,
                    holder: holder.to_string(),
                });
            }
        }
        for slot in table.released.iter_mut() {
            slot.ports.retain(|p| *p != port);
        }
        Ok(())
    }

    /// Lowest port that is neither active nor released; once the range is
    /// exhausted, the oldest released port.
    fn next_free_port(
        table: &mut NetworkTable,
        server: &str,
        taken: &[u16],
    ) -> Result<u16, AllocationError> {
        let fresh = (table.range_start..=table.range_end).find(|port| {
            !taken.contains(port) && table.holder_of(*port).is_none() && !table.is_released(*port)
        });
        if let Some(port) = fresh {
            return Ok(port);
        }

        let (start, end) = (table.range_start, table.range_end);
        let reusable = table.released.iter().enumerate().find_map(|(slot_index, slot)| {
            slot.ports
                .iter()
                .position(|p| (start..=end).contains(p) && !taken.contains(p))
                .map(|port_index| (slot_index, port_index))
        });
        if let Some((slot_index, port_index)) = reusable {
            let slot = &mut table.released[slot_index];
            let port = slot.ports.remove(port_index);
            warn!(
                "Port range exhausted; reusing port {} released by '{}'",
                port, slot.server
            );
            table.released.retain(|s| !s.ports.is_empty());
            return Ok(port);
        }

        Err(AllocationError::PortRangeExhausted {
            server: server.to_string(),
            start,
            end,
        })
    }

    fn fresh_secret(table: &NetworkTable) -> String {
        loop {
            let mut bytes = [0u8; SECRET_BYTES];
            OsRng.fill_bytes(&mut bytes);
            let secret = hex::encode(bytes);
            if !table.secret_in_use(&secret) {
                return secret;
            }
        }
    }

    /// Give up `server`'s allocation. Its ports and secret are only handed
    /// out again once the range runs dry.
    pub async fn release(&self, server: &str) -> LmcpResult<Option<NetworkAllocation>> {
        let mut table = self.table.lock().await;
        let before = table.clone();
        let Some(allocation) = table.allocations.remove(server) else {
            return Ok(None);
        };
        table.released.push_back(ReleasedSlot {
            server: allocation.server.clone(),
            ports: allocation
                .ports
                .iter()
                .copied()
                .filter(|_| !allocation.fixed)
                .collect(),
            forwarding_secret: allocation.forwarding_secret.clone(),
            released_at: Utc::now(),
        });
        if let Err(e) = self.persist(&table) {
            *table = before;
            return Err(e);
        }
        info!("Released network allocation of '{}'", server);
        Ok(Some(allocation))
    }

    pub async fn get(&self, server: &str) -> Option<NetworkAllocation> {
        self.table.lock().await.allocations.get(server).cloned()
    }

    /// Every active allocation, keyed by server name.
    pub async fn snapshot(&self) -> BTreeMap<String, NetworkAllocation> {
        self.table.lock().await.allocations.clone()
    }

    pub async fn verify(&self) -> Result<(), AllocationError> {
        self.table.lock().await.verify()
    }

    fn persist(&self, table: &NetworkTable) -> LmcpResult<()> {
        match &self.path {
            Some(path) => table.save(path),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;
    use crate::core::error::LmcpError;

    fn cluster() -> ClusterDefinition {
        ClusterDefinition::new("demo", "velocity", "velocity.toml")
            .with_backend("survival", "survival.toml")
            .with_backend("creative", "creative.toml")
            .with_backend("lobby", "lobby.toml")
    }

    fn backend(name: &str) -> AllocationRequest {
        AllocationRequest {
            server: name.into(),
            ports: 1,
            needs_forwarding_secret: true,
            preferred_port: None,
        }
    }

    #[tokio::test]
    async fn lowest_free_ports_and_distinct_secrets() {
        let allocator = NetworkAllocator::in_memory(30000, 30010);
        let cluster = cluster();
        let a = allocator.allocate(&cluster, &backend("survival")).await.unwrap();
        let b = allocator.allocate(&cluster, &backend("creative")).await.unwrap();
        assert_eq!(a.ports, vec![30000]);
        assert_eq!(b.ports, vec![30001]);
        assert_ne!(a.forwarding_secret, b.forwarding_secret);
        assert_eq!(a.forwarding_secret.as_ref().map(String::len), Some(64));
        assert_eq!(a.hostname, "demo-survival");
    }

    #[tokio::test]
    async fn allocation_is_stable() {
        let allocator = NetworkAllocator::in_memory(30000, 30010);
        let cluster = cluster();
        let first = allocator.allocate(&cluster, &backend("survival")).await.unwrap();
        allocator.allocate(&cluster, &backend("creative")).await.unwrap();
        let again = allocator.allocate(&cluster, &backend("survival")).await.unwrap();
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn released_ports_wait_until_range_is_exhausted() {
        let allocator = NetworkAllocator::in_memory(30000, 30001);
        let cluster = cluster();
        allocator.allocate(&cluster, &backend("survival")).await.unwrap();
        allocator.release("survival").await.unwrap();

        let creative = allocator.allocate(&cluster, &backend("creative")).await.unwrap();
        assert_eq!(creative.ports, vec![30001]);

        let lobby = allocator.allocate(&cluster, &backend("lobby")).await.unwrap();
        assert_eq!(lobby.ports, vec![30000]);

        let err = allocator
            .allocate(&cluster, &backend("survival"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LmcpError::Allocation(AllocationError::PortRangeExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn fixed_port_conflicts_are_reported() {
        let allocator = NetworkAllocator::in_memory(30000, 30010);
        let cluster = cluster();
        let mut proxy = backend("velocity");
        proxy.needs_forwarding_secret = false;
        proxy.preferred_port = Some(25565);
        let allocation = allocator.allocate(&cluster, &proxy).await.unwrap();
        assert_eq!(allocation.ports, vec![25565]);
        assert!(allocation.forwarding_secret.is_none());

        let mut clash = backend("survival");
        clash.preferred_port = Some(25565);
        let err = allocator.allocate(&cluster, &clash).await.unwrap_err();
        assert!(matches!(
            err,
            LmcpError::Allocation(AllocationError::PortConflict { port: 25565, .. })
        ));
    }

    #[tokio::test]
    async fn unknown_servers_are_rejected() {
        let allocator = NetworkAllocator::in_memory(30000, 30010);
        let err = allocator
            .allocate(&cluster(), &backend("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LmcpError::Allocation(AllocationError::UnknownServer(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_allocations_never_share_ports() {
        let allocator = Arc::new(NetworkAllocator::in_memory(30000, 30010));
        let cluster = Arc::new(cluster());
        let mut handles = Vec::new();
        for name in ["survival", "creative", "lobby"] {
            let allocator = Arc::clone(&allocator);
            let cluster = Arc::clone(&cluster);
            handles.push(tokio::spawn(async move {
                allocator.allocate(&cluster, &backend(name)).await.unwrap()
            }));
        }
        let mut ports = BTreeSet::new();
        for handle in handles {
            ports.insert(handle.await.unwrap().ports[0]);
        }
        assert_eq!(ports.len(), 3);
    }

    #[tokio::test]
    async fn persisted_table_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.json");
        let cluster = cluster();
        let first = {
            let allocator = NetworkAllocator::open(path.clone(), 30000, 30010).unwrap();
            allocator.allocate(&cluster, &backend("survival")).await.unwrap()
        };
        let allocator = NetworkAllocator::open(path, 30000, 30010).unwrap();
        assert_eq!(allocator.get("survival").await, Some(first));
    }
}

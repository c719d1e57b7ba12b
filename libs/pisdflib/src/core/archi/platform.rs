use std::collections::HashMap;

use crate::core::archi::{Cluster, ClusterId, HwTypeId, LrtId, MemoryBus, Pe, PeId};
use crate::core::error::{PisdfError, Result};

/// Immutable description of the execution platform.
pub struct Platform {
    pes: Vec<Pe>,
    clusters: Vec<Cluster>,
    hw_types: Vec<String>,
    /// Directional buses, keyed (from, to).
    buses: HashMap<(ClusterId, ClusterId), MemoryBus>,
    grt: PeId,
    lrt_count: u16,
    external_buffer_sizes: Vec<usize>,
}

impl Platform {
    pub fn builder() -> PlatformBuilder {
        PlatformBuilder::default()
    }

    pub fn pe_array(&self) -> &[Pe] {
        &self.pes
    }

    pub fn pe(&self, ix: PeId) -> &Pe {
        &self.pes[ix.0 as usize]
    }

    pub fn pe_count(&self) -> usize {
        self.pes.len()
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn cluster(&self, ix: ClusterId) -> &Cluster {
        &self.clusters[ix.0 as usize]
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn lrt_count(&self) -> u16 {
        self.lrt_count
    }

    pub fn hw_type_count(&self) -> usize {
        self.hw_types.len()
    }

    /// The PE hosting the global runtime (driver).
    pub fn grt(&self) -> PeId {
        self.grt
    }

    pub fn external_buffer_sizes(&self) -> &[usize] {
        &self.external_buffer_sizes
    }

    /// Directional bus between two clusters, if any.
    pub fn cluster_to_cluster_memory_bus(
        &self,
        from: ClusterId,
        to: ClusterId,
    ) -> Option<&MemoryBus> {
        self.buses.get(&(from, to))
    }

    /// Cost of moving `bytes` from `src` to `snk`.
    ///
    /// Zero within a cluster, the directional bus cost across clusters and
    /// `u64::MAX` when no bus connects them. Not commutative.
    pub fn data_communication_cost_pe_to_pe(&self, src: PeId, snk: PeId, bytes: u64) -> u64 {
        let from = self.pe(src).cluster;
        let to = self.pe(snk).cluster;
        if from == to {
            return 0;
        }
        match self.cluster_to_cluster_memory_bus(from, to) {
            Some(bus) => bus.cost(bytes),
            None => u64::MAX,
        }
    }
}

/// Checked construction of a [`Platform`].
#[derive(Default)]
pub struct PlatformBuilder {
    pes: Vec<Pe>,
    clusters: Vec<Cluster>,
    hw_types: Vec<String>,
    buses: HashMap<(ClusterId, ClusterId), MemoryBus>,
    grt: Option<PeId>,
    external_buffer_sizes: Vec<usize>,
}

impl PlatformBuilder {
    pub fn add_hw_type(&mut self, name: impl Into<String>) -> HwTypeId {
        self.hw_types.push(name.into());
        HwTypeId(self.hw_types.len() as u32 - 1)
    }

    pub fn add_cluster(&mut self, name: impl Into<String>) -> ClusterId {
        let ix = ClusterId(self.clusters.len() as u32);
        self.clusters.push(Cluster {
            ix,
            name: name.into(),
            pes: Vec::new(),
        });
        ix
    }

    /// Add a PE to a cluster; each PE gets its own LRT.
    pub fn add_pe(
        &mut self,
        name: impl Into<String>,
        hw_type: HwTypeId,
        cluster: ClusterId,
    ) -> PeId {
        let ix = PeId(self.pes.len() as u32);
        let lrt = LrtId(self.pes.len() as u16);
        self.pes.push(Pe {
            ix,
            name: name.into(),
            hw_type,
            cluster,
            lrt,
        });
        self.clusters[cluster.0 as usize].pes.push(ix);
        ix
    }

    /// Declare the symmetric pair of directional buses between two clusters.
    pub fn connect_clusters(
        &mut self,
        a: ClusterId,
        b: ClusterId,
        bus_a_to_b: MemoryBus,
        bus_b_to_a: MemoryBus,
    ) {
        self.buses.insert((a, b), bus_a_to_b);
        self.buses.insert((b, a), bus_b_to_a);
    }

    pub fn set_grt(&mut self, pe: PeId) {
        self.grt = Some(pe);
    }

    /// Register an external buffer; returns the index used by
    /// EXTERN_IN/EXTERN_OUT vertices.
    pub fn register_external_buffer(&mut self, size: usize) -> u32 {
        self.external_buffer_sizes.push(size);
        self.external_buffer_sizes.len() as u32 - 1
    }

    pub fn build(self) -> Result<Platform> {
        if self.pes.is_empty() {
            return Err(PisdfError::InvalidGraph("platform has no PE".into()));
        }
        for cluster in &self.clusters {
            if cluster.pes.is_empty() {
                return Err(PisdfError::InvalidGraph(format!(
                    "cluster [{}] has no PE",
                    cluster.name
                )));
            }
        }
        let lrt_count = self.pes.len() as u16;
        Ok(Platform {
            grt: self.grt.unwrap_or(PeId(0)),
            lrt_count,
            pes: self.pes,
            clusters: self.clusters,
            hw_types: self.hw_types,
            buses: self.buses,
            external_buffer_sizes: self.external_buffer_sizes,
        })
    }
}

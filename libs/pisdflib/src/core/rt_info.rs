use crate::core::archi::{ClusterId, Pe, PeId, Platform};
use crate::core::error::Result;
use crate::core::expr::{Expression, ParamTable};

const DEFAULT_TIMING: i64 = 100;

/// Runtime information attached to an executable vertex: mapping
/// constraints, per-hardware-type timing expressions and the bound kernel.
#[derive(Debug, Clone)]
pub struct RtInfo {
    /// One timing expression per hardware type.
    timings: Vec<Expression>,
    pe_mappable: Vec<bool>,
    cluster_mappable: Vec<bool>,
    kernel_ix: Option<u32>,
}

impl RtInfo {
    pub fn new(platform: &Platform) -> Self {
        Self {
            timings: vec![Expression::constant(DEFAULT_TIMING); platform.hw_type_count().max(1)],
            pe_mappable: vec![true; platform.pe_count()],
            cluster_mappable: vec![true; platform.cluster_count()],
            kernel_ix: None,
        }
    }

    pub fn set_kernel_ix(&mut self, ix: u32) {
        self.kernel_ix = Some(ix);
    }

    pub fn kernel_ix(&self) -> Option<u32> {
        self.kernel_ix
    }

    pub fn set_timing_on_hw_type(&mut self, hw_type: u32, timing: Expression) {
        self.timings[hw_type as usize] = timing;
    }

    pub fn set_timing_on_all_hw_types(&mut self, timing: Expression) {
        for slot in &mut self.timings {
            *slot = timing.clone();
        }
    }

    pub fn set_mappable_on_pe(&mut self, pe: PeId, mappable: bool) {
        self.pe_mappable[pe.0 as usize] = mappable;
    }

    pub fn set_mappable_on_cluster(&mut self, cluster: ClusterId, mappable: bool) {
        self.cluster_mappable[cluster.0 as usize] = mappable;
    }

    /// Restrict mapping to exactly one cluster.
    pub fn set_mappable_only_on_cluster(&mut self, cluster: ClusterId) {
        for (ix, slot) in self.cluster_mappable.iter_mut().enumerate() {
            *slot = ix == cluster.0 as usize;
        }
    }

    pub fn is_pe_mappable(&self, pe: &Pe) -> bool {
        self.pe_mappable[pe.ix.0 as usize] && self.cluster_mappable[pe.cluster.0 as usize]
    }

    pub fn is_cluster_mappable(&self, cluster: ClusterId) -> bool {
        self.cluster_mappable[cluster.0 as usize]
    }

    pub fn timing_on_pe(&self, pe: &Pe, params: &dyn ParamTable) -> Result<i64> {
        self.timings[pe.hw_type.0 as usize].evaluate(params)
    }

    /// Minimum execution time over every PE of every mappable cluster.
    ///
    /// Used by the list scheduler as the level increment of a producer.
    pub fn min_execution_time(&self, platform: &Platform, params: &dyn ParamTable) -> Result<i64> {
        let mut min_time = i64::MAX;
        for cluster in platform.clusters() {
            if !self.is_cluster_mappable(cluster.ix) {
                continue;
            }
            for &pe_ix in &cluster.pes {
                let pe = platform.pe(pe_ix);
                if self.pe_mappable[pe_ix.0 as usize] {
                    min_time = min_time.min(self.timing_on_pe(pe, params)?);
                }
            }
        }
        Ok(if min_time == i64::MAX { 0 } else { min_time })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archi::MemoryBus;
    use crate::core::expr::NoParams;

    fn platform() -> Platform {
        let mut builder = Platform::builder();
        let x86 = builder.add_hw_type("x86");
        let dsp = builder.add_hw_type("dsp");
        let cx = builder.add_cluster("X");
        let cy = builder.add_cluster("Y");
        builder.add_pe("P0", x86, cx);
        builder.add_pe("P1", dsp, cy);
        builder.connect_clusters(cx, cy, MemoryBus::fixed(1), MemoryBus::fixed(1));
        builder.build().unwrap()
    }

    #[test]
    fn default_is_mappable_everywhere() {
        let platform = platform();
        let rt = RtInfo::new(&platform);
        for pe in platform.pe_array() {
            assert!(rt.is_pe_mappable(pe));
        }
        assert_eq!(
            rt.timing_on_pe(platform.pe(PeId(0)), &NoParams).unwrap(),
            DEFAULT_TIMING
        );
    }

    #[test]
    fn cluster_restriction_masks_pes() {
        let platform = platform();
        let mut rt = RtInfo::new(&platform);
        rt.set_mappable_only_on_cluster(ClusterId(1));
        assert!(!rt.is_pe_mappable(platform.pe(PeId(0))));
        assert!(rt.is_pe_mappable(platform.pe(PeId(1))));
    }

    #[test]
    fn min_execution_time_scans_mappable_clusters() {
        let platform = platform();
        let mut rt = RtInfo::new(&platform);
        rt.set_timing_on_hw_type(0, Expression::constant(40));
        rt.set_timing_on_hw_type(1, Expression::constant(10));
        assert_eq!(rt.min_execution_time(&platform, &NoParams).unwrap(), 10);
        rt.set_mappable_on_cluster(ClusterId(1), false);
        assert_eq!(rt.min_execution_time(&platform, &NoParams).unwrap(), 40);
    }
}

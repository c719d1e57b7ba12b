use serde::Serialize;

/// Index of a processing element in the platform's flat PE list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PeId(pub u32);

/// Index of a cluster in the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClusterId(pub u32);

/// Index of a local runtime (worker thread).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LrtId(pub u16);

/// Index of a hardware type (x86 core, DSP, ...). Timing expressions are
/// attached per hardware type, not per PE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HwTypeId(pub u32);

/// One schedulable compute resource.
#[derive(Debug, Clone, Serialize)]
pub struct Pe {
    pub ix: PeId,
    pub name: String,
    pub hw_type: HwTypeId,
    pub cluster: ClusterId,
    /// Worker thread consuming the jobs mapped onto this PE. Several PEs
    /// may share one LRT.
    pub lrt: LrtId,
}

/// A set of PEs sharing one memory interface.
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    pub ix: ClusterId,
    pub name: String,
    pub pes: Vec<PeId>,
}

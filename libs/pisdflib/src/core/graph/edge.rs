use crate::core::expr::Expression;
use crate::core::graph::VertexId;

/// Index of an edge within its containing graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u32);

/// A buffer of initial tokens on an edge.
///
/// A delay with neither user setter nor user getter is backed by
/// synthesized INIT/END actors; when additionally flagged persistent its
/// contents survive iterations through a dedicated virtual address.
#[derive(Debug, Clone)]
pub struct Delay {
    pub value: Expression,
    pub persistent: bool,
    /// Edge feeding the initial tokens (user setter or synthesized INIT).
    pub setter_edge: Option<EdgeId>,
    /// Edge draining the residual tokens (user getter or synthesized END).
    pub getter_edge: Option<EdgeId>,
    /// The structural DELAY vertex carrying the setter/getter ports.
    pub vertex: Option<VertexId>,
    /// Assigned at finalize time for persistent delays.
    pub persistent_address: Option<u64>,
}

/// A directed connection between two vertex ports.
pub struct Edge {
    pub ix: EdgeId,
    pub source: VertexId,
    pub source_port: u32,
    pub sink: VertexId,
    pub sink_port: u32,
    pub src_rate: Expression,
    pub snk_rate: Expression,
    pub delay: Option<Delay>,
    /// Zero-rate config-to-vertex parameter plumbing; kept distinct from
    /// nil edges, which are recognised by their rates alone.
    pub config_param_edge: bool,
}

impl Edge {
    pub fn delay_value(&self, params: &dyn crate::core::expr::ParamTable) -> crate::core::error::Result<i64> {
        match &self.delay {
            Some(delay) => delay.value.evaluate(params),
            None => Ok(0),
        }
    }
}

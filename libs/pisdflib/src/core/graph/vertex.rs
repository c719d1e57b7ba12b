use crate::core::graph::{EdgeId, GraphId};
use crate::core::rt_info::RtInfo;

/// Index of a vertex within its containing graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(pub u32);

/// Subtype tag of a vertex. Per-subtype behaviour (timing template,
/// allocation rules, kernel parameter template) dispatches on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexKind {
    /// Regular actor bound to a user kernel.
    Normal,
    /// Configuration actor whose outputs become parameter values.
    Config,
    /// Hierarchical vertex standing for a subgraph instance.
    Graph { graph: GraphId, sub_ix: u32 },
    /// Input interface inside a subgraph; `port` is the corresponding
    /// input port of the enclosing Graph vertex.
    InputIf { port: u32 },
    /// Output interface inside a subgraph.
    OutputIf { port: u32 },
    Fork,
    Join,
    Head,
    Tail,
    Repeat,
    Duplicate,
    /// Produces the initial tokens of the referenced delay edge.
    Init { edge: EdgeId },
    /// Consumes the residual tokens of the referenced delay edge.
    End { edge: EdgeId },
    /// Reads from an externally registered buffer.
    ExternIn { buffer: u32 },
    /// Writes into an externally registered buffer.
    ExternOut { buffer: u32 },
    /// Structural vertex standing for a delay with setter/getter plumbing.
    Delay { edge: EdgeId },
}

/// A vertex of a PiSDF graph.
pub struct Vertex {
    pub ix: VertexId,
    pub name: String,
    pub kind: VertexKind,
    /// One slot per input port; filled during construction.
    pub inputs: Vec<Option<EdgeId>>,
    /// One slot per output port.
    pub outputs: Vec<Option<EdgeId>>,
    pub rt: RtInfo,
    /// Parameters (by index in the graph's declaration list) handed to the
    /// kernel of a NORMAL/CONFIG actor.
    pub input_params: Vec<usize>,
    /// CONFIG only: parameters set from the kernel's output values, in
    /// positional order.
    pub output_params: Vec<usize>,
}

impl Vertex {
    /// Whether firings of this vertex become schedulable tasks.
    ///
    /// Hierarchy, interfaces and delay placeholders are structural: their
    /// semantics are carried by dependency resolution, not by jobs.
    pub fn is_executable(&self) -> bool {
        !matches!(
            self.kind,
            VertexKind::Graph { .. }
                | VertexKind::InputIf { .. }
                | VertexKind::OutputIf { .. }
                | VertexKind::Delay { .. }
        )
    }

    /// Vertices whose repetition count must solve to exactly one.
    pub fn requires_unit_rv(&self) -> bool {
        matches!(
            self.kind,
            VertexKind::Config
                | VertexKind::Delay { .. }
                | VertexKind::Init { .. }
                | VertexKind::End { .. }
                | VertexKind::ExternIn { .. }
                | VertexKind::ExternOut { .. }
        )
    }

    pub fn input_edge(&self, port: usize) -> Option<EdgeId> {
        self.inputs.get(port).copied().flatten()
    }

    pub fn output_edge(&self, port: usize) -> Option<EdgeId> {
        self.outputs.get(port).copied().flatten()
    }
}

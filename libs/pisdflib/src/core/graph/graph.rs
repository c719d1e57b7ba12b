use crate::core::graph::{Edge, EdgeId, Vertex, VertexId};
use crate::core::param::Param;

/// Index of a graph in the application's flat graph list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(pub u32);

/// One hierarchy level of the application.
pub struct Graph {
    pub ix: GraphId,
    pub name: String,
    /// Enclosing graph and the Graph vertex standing for this graph there.
    pub parent: Option<(GraphId, VertexId)>,
    pub vertices: Vec<Vertex>,
    pub edges: Vec<Edge>,
    pub params: Vec<Param>,
    /// Graph vertices, ordered by their `sub_ix`.
    pub subgraphs: Vec<VertexId>,
    /// Interface vertices, ordered by interface port.
    pub input_interfaces: Vec<VertexId>,
    pub output_interfaces: Vec<VertexId>,
    /// This graph declares at least one dynamic parameter.
    pub dynamic: bool,
    /// No dynamic parameter anywhere in this graph's subtree.
    pub subtree_static: bool,
}

impl Graph {
    pub fn vertex(&self, ix: VertexId) -> &Vertex {
        &self.vertices[ix.0 as usize]
    }

    pub fn vertex_mut(&mut self, ix: VertexId) -> &mut Vertex {
        &mut self.vertices[ix.0 as usize]
    }

    pub fn edge(&self, ix: EdgeId) -> &Edge {
        &self.edges[ix.0 as usize]
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn subgraph_count(&self) -> usize {
        self.subgraphs.len()
    }
}

/// The whole application: a tree of graphs stored flat and indexed by
/// [`GraphId`]. Root is the top-level graph.
pub struct App {
    pub(crate) graphs: Vec<Graph>,
    pub(crate) root: GraphId,
    /// (address, byte size) of every persistent delay, assigned at
    /// finalize time.
    pub(crate) persistent_delays: Vec<(u64, usize)>,
}

impl App {
    pub fn root(&self) -> GraphId {
        self.root
    }

    pub fn graph(&self, ix: GraphId) -> &Graph {
        &self.graphs[ix.0 as usize]
    }

    pub fn graph_mut(&mut self, ix: GraphId) -> &mut Graph {
        &mut self.graphs[ix.0 as usize]
    }

    pub fn graphs(&self) -> &[Graph] {
        &self.graphs
    }

    /// Persistent delay buffers to pre-allocate at platform start.
    pub fn persistent_delays(&self) -> &[(u64, usize)] {
        &self.persistent_delays
    }

    /// First virtual address free for runtime FIFO allocation.
    pub fn first_dynamic_address(&self) -> u64 {
        self.persistent_delays.len() as u64
    }
}

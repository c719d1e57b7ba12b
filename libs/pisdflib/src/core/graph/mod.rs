//! PiSDF application model: vertices, edges, delays, graphs and the flat
//! graph tree ([`App`]). Built once through [`AppBuilder`]; immutable for
//! the lifetime of the runtime.

mod builder;
mod edge;
mod graph;
mod vertex;

pub use builder::AppBuilder;
pub use edge::{Delay, Edge, EdgeId};
pub use graph::{App, Graph, GraphId};
pub use vertex::{Vertex, VertexId, VertexKind};

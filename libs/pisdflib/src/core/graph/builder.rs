use tracing::debug;

use crate::core::archi::Platform;
use crate::core::error::{PisdfError, Result};
use crate::core::expr::Expression;
use crate::core::graph::{App, Delay, Edge, EdgeId, Graph, GraphId, Vertex, VertexId, VertexKind};
use crate::core::param::{DeclScope, Param, ParamKind};
use crate::core::rt_info::RtInfo;

/// Checked construction of an [`App`].
///
/// The builder owns the graph tree while it grows; [`AppBuilder::finalize`]
/// synthesizes delay plumbing (DELAY/INIT/END vertices), assigns persistent
/// delay addresses, validates the structure and freezes it.
pub struct AppBuilder<'p> {
    platform: &'p Platform,
    graphs: Vec<Graph>,
    root: GraphId,
}

impl<'p> AppBuilder<'p> {
    pub fn new(name: impl Into<String>, platform: &'p Platform) -> Self {
        let root = GraphId(0);
        let graphs = vec![Graph {
            ix: root,
            name: name.into(),
            parent: None,
            vertices: Vec::new(),
            edges: Vec::new(),
            params: Vec::new(),
            subgraphs: Vec::new(),
            input_interfaces: Vec::new(),
            output_interfaces: Vec::new(),
            dynamic: false,
            subtree_static: true,
        }];
        Self {
            platform,
            graphs,
            root,
        }
    }

    pub fn root(&self) -> GraphId {
        self.root
    }

    pub fn graph(&self, ix: GraphId) -> &Graph {
        &self.graphs[ix.0 as usize]
    }

    fn graph_mut(&mut self, ix: GraphId) -> &mut Graph {
        &mut self.graphs[ix.0 as usize]
    }

    /// Declare a parameter; returns its index in the graph's list.
    pub fn add_param(&mut self, graph: GraphId, param: Param) -> usize {
        let g = self.graph_mut(graph);
        if param.kind == ParamKind::Dynamic {
            g.dynamic = true;
        }
        g.params.push(param);
        g.params.len() - 1
    }

    /// Declare a static parameter computed from an expression over the
    /// parameters declared so far.
    pub fn add_derived_param(
        &mut self,
        graph: GraphId,
        name: impl Into<String>,
        expr: &str,
    ) -> Result<usize> {
        let g = self.graph(graph);
        let scope = DeclScope(&g.params);
        let compiled = Expression::compile(expr, &scope)?;
        let param = Param::derived(name, &compiled, &scope)?;
        Ok(self.add_param(graph, param))
    }

    fn add_vertex(
        &mut self,
        graph: GraphId,
        name: impl Into<String>,
        kind: VertexKind,
        n_in: usize,
        n_out: usize,
    ) -> VertexId {
        let rt = RtInfo::new(self.platform);
        let g = self.graph_mut(graph);
        let ix = VertexId(g.vertices.len() as u32);
        g.vertices.push(Vertex {
            ix,
            name: name.into(),
            kind,
            inputs: vec![None; n_in],
            outputs: vec![None; n_out],
            rt,
            input_params: Vec::new(),
            output_params: Vec::new(),
        });
        ix
    }

    pub fn add_actor(
        &mut self,
        graph: GraphId,
        name: impl Into<String>,
        n_in: usize,
        n_out: usize,
    ) -> VertexId {
        self.add_vertex(graph, name, VertexKind::Normal, n_in, n_out)
    }

    pub fn add_config(
        &mut self,
        graph: GraphId,
        name: impl Into<String>,
        n_in: usize,
        n_out: usize,
    ) -> VertexId {
        self.add_vertex(graph, name, VertexKind::Config, n_in, n_out)
    }

    pub fn add_fork(&mut self, graph: GraphId, name: impl Into<String>, n_out: usize) -> VertexId {
        self.add_vertex(graph, name, VertexKind::Fork, 1, n_out)
    }

    pub fn add_join(&mut self, graph: GraphId, name: impl Into<String>, n_in: usize) -> VertexId {
        self.add_vertex(graph, name, VertexKind::Join, n_in, 1)
    }

    pub fn add_head(&mut self, graph: GraphId, name: impl Into<String>, n_in: usize) -> VertexId {
        self.add_vertex(graph, name, VertexKind::Head, n_in, 1)
    }

    pub fn add_tail(&mut self, graph: GraphId, name: impl Into<String>, n_in: usize) -> VertexId {
        self.add_vertex(graph, name, VertexKind::Tail, n_in, 1)
    }

    pub fn add_repeat(&mut self, graph: GraphId, name: impl Into<String>) -> VertexId {
        self.add_vertex(graph, name, VertexKind::Repeat, 1, 1)
    }

    pub fn add_duplicate(
        &mut self,
        graph: GraphId,
        name: impl Into<String>,
        n_out: usize,
    ) -> VertexId {
        self.add_vertex(graph, name, VertexKind::Duplicate, 1, n_out)
    }

    pub fn add_extern_in(
        &mut self,
        graph: GraphId,
        name: impl Into<String>,
        buffer: u32,
    ) -> VertexId {
        self.add_vertex(graph, name, VertexKind::ExternIn { buffer }, 0, 1)
    }

    pub fn add_extern_out(
        &mut self,
        graph: GraphId,
        name: impl Into<String>,
        buffer: u32,
    ) -> VertexId {
        self.add_vertex(graph, name, VertexKind::ExternOut { buffer }, 1, 0)
    }

    /// Create a subgraph and the hierarchical vertex standing for it.
    ///
    /// The child graph gets one input interface per input port and one
    /// output interface per output port, in port order.
    pub fn add_subgraph(
        &mut self,
        parent: GraphId,
        name: impl Into<String>,
        n_in: usize,
        n_out: usize,
    ) -> (VertexId, GraphId) {
        let name = name.into();
        let child_ix = GraphId(self.graphs.len() as u32);
        let sub_ix = self.graph(parent).subgraphs.len() as u32;
        let vertex = self.add_vertex(
            parent,
            name.clone(),
            VertexKind::Graph {
                graph: child_ix,
                sub_ix,
            },
            n_in,
            n_out,
        );
        self.graph_mut(parent).subgraphs.push(vertex);
        self.graphs.push(Graph {
            ix: child_ix,
            name,
            parent: Some((parent, vertex)),
            vertices: Vec::new(),
            edges: Vec::new(),
            params: Vec::new(),
            subgraphs: Vec::new(),
            input_interfaces: Vec::new(),
            output_interfaces: Vec::new(),
            dynamic: false,
            subtree_static: true,
        });
        for port in 0..n_in {
            let interface = self.add_vertex(
                child_ix,
                format!("in_{port}"),
                VertexKind::InputIf { port: port as u32 },
                0,
                1,
            );
            self.graph_mut(child_ix).input_interfaces.push(interface);
        }
        for port in 0..n_out {
            let interface = self.add_vertex(
                child_ix,
                format!("out_{port}"),
                VertexKind::OutputIf { port: port as u32 },
                1,
                0,
            );
            self.graph_mut(child_ix).output_interfaces.push(interface);
        }
        (vertex, child_ix)
    }

    pub fn input_interface(&self, graph: GraphId, port: usize) -> VertexId {
        self.graph(graph).input_interfaces[port]
    }

    pub fn output_interface(&self, graph: GraphId, port: usize) -> VertexId {
        self.graph(graph).output_interfaces[port]
    }

    /// Connect two ports with rate expressions compiled against the
    /// graph's parameter scope.
    pub fn connect(
        &mut self,
        graph: GraphId,
        source: VertexId,
        source_port: u32,
        sink: VertexId,
        sink_port: u32,
        src_rate: &str,
        snk_rate: &str,
    ) -> Result<EdgeId> {
        let (src_rate, snk_rate) = {
            let g = self.graph(graph);
            let scope = DeclScope(&g.params);
            (
                Expression::compile(src_rate, &scope)?,
                Expression::compile(snk_rate, &scope)?,
            )
        };
        self.connect_expr(graph, source, source_port, sink, sink_port, src_rate, snk_rate)
    }

    pub fn connect_const(
        &mut self,
        graph: GraphId,
        source: VertexId,
        source_port: u32,
        sink: VertexId,
        sink_port: u32,
        src_rate: i64,
        snk_rate: i64,
    ) -> Result<EdgeId> {
        self.connect_expr(
            graph,
            source,
            source_port,
            sink,
            sink_port,
            Expression::constant(src_rate),
            Expression::constant(snk_rate),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn connect_expr(
        &mut self,
        graph: GraphId,
        source: VertexId,
        source_port: u32,
        sink: VertexId,
        sink_port: u32,
        src_rate: Expression,
        snk_rate: Expression,
    ) -> Result<EdgeId> {
        let g = self.graph_mut(graph);
        let ix = EdgeId(g.edges.len() as u32);
        {
            let src = g
                .vertices
                .get_mut(source.0 as usize)
                .ok_or_else(|| PisdfError::InvalidGraph("unknown source vertex".into()))?;
            let slot = src.outputs.get_mut(source_port as usize).ok_or_else(|| {
                PisdfError::InvalidGraph(format!(
                    "vertex [{}] has no output port {source_port}",
                    src.name
                ))
            })?;
            if slot.is_some() {
                return Err(PisdfError::InvalidGraph(format!(
                    "output port {source_port} of [{}] already connected",
                    src.name
                )));
            }
            *slot = Some(ix);
        }
        {
            let snk = g
                .vertices
                .get_mut(sink.0 as usize)
                .ok_or_else(|| PisdfError::InvalidGraph("unknown sink vertex".into()))?;
            let slot = snk.inputs.get_mut(sink_port as usize).ok_or_else(|| {
                PisdfError::InvalidGraph(format!(
                    "vertex [{}] has no input port {sink_port}",
                    snk.name
                ))
            })?;
            if slot.is_some() {
                return Err(PisdfError::InvalidGraph(format!(
                    "input port {sink_port} of [{}] already connected",
                    snk.name
                )));
            }
            *slot = Some(ix);
        }
        g.edges.push(Edge {
            ix,
            source,
            source_port,
            sink,
            sink_port,
            src_rate,
            snk_rate,
            delay: None,
            config_param_edge: false,
        });
        Ok(ix)
    }

    /// Flag an edge as config-to-vertex parameter plumbing.
    pub fn mark_config_param_edge(&mut self, graph: GraphId, edge: EdgeId) {
        self.graph_mut(graph).edges[edge.0 as usize].config_param_edge = true;
    }

    /// Place an endpoint-less delay on an edge. INIT/END actors are
    /// synthesized at finalize time; `persistent` makes the contents
    /// survive iterations.
    pub fn add_delay(
        &mut self,
        graph: GraphId,
        edge: EdgeId,
        value: &str,
        persistent: bool,
    ) -> Result<()> {
        self.add_delay_with(graph, edge, value, persistent, None, None)
    }

    /// Place a delay with explicit setter and/or getter connections.
    ///
    /// `setter` is (vertex, output port, rate expression) supplying the
    /// initial tokens, `getter` the symmetric drain. A persistent delay
    /// accepts neither.
    pub fn add_delay_with(
        &mut self,
        graph: GraphId,
        edge: EdgeId,
        value: &str,
        persistent: bool,
        setter: Option<(VertexId, u32, &str)>,
        getter: Option<(VertexId, u32, &str)>,
    ) -> Result<()> {
        if persistent && (setter.is_some() || getter.is_some()) {
            let g = self.graph(graph);
            let e = g.edge(edge);
            return Err(PisdfError::DelayPersistentWithSetter {
                edge: format!(
                    "{}->{}",
                    g.vertex(e.source).name,
                    g.vertex(e.sink).name
                ),
            });
        }
        let value = {
            let g = self.graph(graph);
            if g.edges[edge.0 as usize].delay.is_some() {
                return Err(PisdfError::InvalidGraph(
                    "edge already carries a delay".into(),
                ));
            }
            let scope = DeclScope(&g.params);
            Expression::compile(value, &scope)?
        };
        let mut delay = Delay {
            value: value.clone(),
            persistent,
            setter_edge: None,
            getter_edge: None,
            vertex: None,
            persistent_address: None,
        };
        if setter.is_some() || getter.is_some() {
            let n_in = usize::from(setter.is_some());
            // The output port always exists: either the user getter or the
            // END actor synthesized at finalize time drains the residue.
            let n_out = 1;
            let name = format!("delay_{}", edge.0);
            let delay_vertex =
                self.add_vertex(graph, name, VertexKind::Delay { edge }, n_in, n_out);
            if let Some((vertex, port, rate)) = setter {
                let rate = {
                    let scope = DeclScope(&self.graph(graph).params);
                    Expression::compile(rate, &scope)?
                };
                delay.setter_edge = Some(self.connect_expr(
                    graph,
                    vertex,
                    port,
                    delay_vertex,
                    0,
                    rate,
                    value.clone(),
                )?);
            }
            if let Some((vertex, port, rate)) = getter {
                let rate = {
                    let scope = DeclScope(&self.graph(graph).params);
                    Expression::compile(rate, &scope)?
                };
                delay.getter_edge = Some(self.connect_expr(
                    graph,
                    delay_vertex,
                    0,
                    vertex,
                    port,
                    value.clone(),
                    rate,
                )?);
            }
            delay.vertex = Some(delay_vertex);
        }
        self.graph_mut(graph).edges[edge.0 as usize].delay = Some(delay);
        Ok(())
    }

    /// Parameters handed to the kernel of a NORMAL/CONFIG actor.
    pub fn set_input_params(&mut self, graph: GraphId, vertex: VertexId, params: &[usize]) {
        self.graph_mut(graph).vertices[vertex.0 as usize].input_params = params.to_vec();
    }

    /// Parameters a CONFIG actor sets from its kernel outputs.
    pub fn set_output_params(&mut self, graph: GraphId, vertex: VertexId, params: &[usize]) {
        self.graph_mut(graph).vertices[vertex.0 as usize].output_params = params.to_vec();
    }

    pub fn rt_mut(&mut self, graph: GraphId, vertex: VertexId) -> &mut RtInfo {
        &mut self.graph_mut(graph).vertices[vertex.0 as usize].rt
    }

    /// Synthesize delay plumbing, validate the structure and freeze it.
    pub fn finalize(mut self) -> Result<App> {
        let mut persistent_delays = Vec::new();
        self.synthesize_delays(&mut persistent_delays)?;
        self.validate()?;
        self.compute_static_flags();
        debug!(
            graphs = self.graphs.len(),
            persistent_delays = persistent_delays.len(),
            "application finalized"
        );
        Ok(App {
            graphs: self.graphs,
            root: self.root,
            persistent_delays,
        })
    }

    fn synthesize_delays(&mut self, persistent_delays: &mut Vec<(u64, usize)>) -> Result<()> {
        for graph_ix in 0..self.graphs.len() {
            let graph = GraphId(graph_ix as u32);
            for edge_ix in 0..self.graphs[graph_ix].edges.len() {
                let edge = EdgeId(edge_ix as u32);
                let Some(delay) = self.graphs[graph_ix].edges[edge_ix].delay.clone() else {
                    continue;
                };
                let mut delay = delay;
                let needs_init = delay.setter_edge.is_none() && delay.getter_edge.is_none()
                    || (delay.setter_edge.is_none() && delay.persistent);
                let needs_end = delay.getter_edge.is_none();
                // A delay with a user getter but no setter keeps no INIT:
                // reading its initial tokens is a DelayUnderflow at
                // resolution time.
                let getter_only = delay.setter_edge.is_none() && delay.getter_edge.is_some();
                if delay.persistent {
                    if delay.value.is_dynamic() {
                        return Err(PisdfError::InvalidGraph(format!(
                            "persistent delay on edge {edge_ix} has a parameterised value"
                        )));
                    }
                    let scope = DeclScope(&self.graphs[graph_ix].params);
                    let size = delay.value.evaluate(&scope)?;
                    if size < 0 {
                        return Err(PisdfError::InvalidGraph(
                            "delay value must be non-negative".into(),
                        ));
                    }
                    let address = persistent_delays.len() as u64;
                    persistent_delays.push((address, size as usize));
                    delay.persistent_address = Some(address);
                }
                let delay_vertex = match delay.vertex {
                    Some(v) => v,
                    None => {
                        let n_in = usize::from(!getter_only);
                        let vertex = self.add_vertex(
                            graph,
                            format!("delay_{edge_ix}"),
                            VertexKind::Delay { edge },
                            n_in,
                            1,
                        );
                        delay.vertex = Some(vertex);
                        vertex
                    }
                };
                if needs_init && !getter_only {
                    let init = self.add_vertex(
                        graph,
                        format!("init_{edge_ix}"),
                        VertexKind::Init { edge },
                        0,
                        1,
                    );
                    delay.setter_edge = Some(self.connect_expr(
                        graph,
                        init,
                        0,
                        delay_vertex,
                        0,
                        delay.value.clone(),
                        delay.value.clone(),
                    )?);
                }
                if needs_end {
                    let end = self.add_vertex(
                        graph,
                        format!("end_{edge_ix}"),
                        VertexKind::End { edge },
                        1,
                        0,
                    );
                    delay.getter_edge = Some(self.connect_expr(
                        graph,
                        delay_vertex,
                        0,
                        end,
                        0,
                        delay.value.clone(),
                        delay.value.clone(),
                    )?);
                }
                self.graphs[graph_ix].edges[edge_ix].delay = Some(delay);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for graph in &self.graphs {
            for vertex in &graph.vertices {
                for (port, slot) in vertex.inputs.iter().enumerate() {
                    if slot.is_none() {
                        return Err(PisdfError::InvalidGraph(format!(
                            "input port {port} of [{}::{}] is not connected",
                            graph.name, vertex.name
                        )));
                    }
                }
                for (port, slot) in vertex.outputs.iter().enumerate() {
                    if slot.is_none() {
                        return Err(PisdfError::InvalidGraph(format!(
                            "output port {port} of [{}::{}] is not connected",
                            graph.name, vertex.name
                        )));
                    }
                }
                for &param_ix in &vertex.output_params {
                    let param = graph.params.get(param_ix).ok_or_else(|| {
                        PisdfError::InvalidGraph(format!(
                            "config [{}] drives unknown parameter {param_ix}",
                            vertex.name
                        ))
                    })?;
                    if param.kind != ParamKind::Dynamic {
                        return Err(PisdfError::InvalidGraph(format!(
                            "config [{}] drives non-dynamic parameter [{}]",
                            vertex.name, param.name
                        )));
                    }
                }
            }
            for param in &graph.params {
                if param.kind == ParamKind::Inherited {
                    let Some((parent, _)) = graph.parent else {
                        return Err(PisdfError::InvalidGraph(format!(
                            "root graph parameter [{}] cannot be inherited",
                            param.name
                        )));
                    };
                    let parent_len = self.graphs[parent.0 as usize].params.len();
                    if param.parent_ix.is_none() || param.parent_ix.unwrap() >= parent_len {
                        return Err(PisdfError::InvalidGraph(format!(
                            "inherited parameter [{}] references an unknown parent parameter",
                            param.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn compute_static_flags(&mut self) {
        // A parameter is effectively dynamic when it is runtime-set itself
        // or mirrors one that is, however deep the inheritance chain.
        // Parents are created before children, so one forward pass settles
        // every chain.
        let mut effective: Vec<Vec<bool>> = Vec::with_capacity(self.graphs.len());
        for ix in 0..self.graphs.len() {
            let graph = &self.graphs[ix];
            let flags: Vec<bool> = graph
                .params
                .iter()
                .map(|param| match param.kind {
                    ParamKind::Static => false,
                    ParamKind::Dynamic | ParamKind::DynamicDependent => true,
                    ParamKind::Inherited => {
                        let (parent, _) = graph.parent.expect("validated");
                        let parent_ix = param.parent_ix.expect("validated");
                        effective[parent.0 as usize][parent_ix]
                    }
                })
                .collect();
            self.graphs[ix].dynamic = flags.iter().any(|&dynamic| dynamic);
            effective.push(flags);
        }
        // Children are created after their parents, so one reverse pass
        // sees every subtree before its root.
        for ix in (0..self.graphs.len()).rev() {
            let mut subtree_static = !self.graphs[ix].dynamic;
            if subtree_static {
                for sub in self.graphs[ix].subgraphs.clone() {
                    let child = match self.graphs[ix].vertices[sub.0 as usize].kind {
                        VertexKind::Graph { graph, .. } => graph,
                        _ => unreachable!("subgraph list holds graph vertices"),
                    };
                    if !self.graphs[child.0 as usize].subtree_static {
                        subtree_static = false;
                        break;
                    }
                }
            }
            self.graphs[ix].subtree_static = subtree_static;
        }
    }
}

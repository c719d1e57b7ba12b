use pisdflib_ipc_types::Fifo;
use tracing::trace;

use crate::core::error::Result;
use crate::core::expr::{ParamBinding, ParamTable};
use crate::core::firing::brv;
use crate::core::graph::{App, EdgeId, GraphId, VertexId, VertexKind};
use crate::core::param::ParamKind;

/// Sentinel for "no task registered yet".
pub const UNSET_IX: u32 = u32::MAX;

/// Index of a graph handler in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u32);

/// Index of a graph firing in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiringId(pub u32);

/// Per-firing view of one declared parameter.
#[derive(Debug, Clone)]
pub struct FiringParam {
    pub kind: FiringParamKind,
    pub value: i64,
    pub resolved: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum FiringParamKind {
    /// Static value, shared with the declaration.
    Value,
    /// Set by a config actor at runtime.
    Dynamic,
    /// Re-evaluated once the firing's dynamic inputs are set.
    DynamicDependent,
    /// Weak lookup into an ancestor firing, collapsed to the first
    /// non-inherited parameter of the chain.
    Inherited { firing: FiringId, ix: usize },
}

/// Vector of firings for one graph invocation.
pub struct GraphHandler {
    pub graph: GraphId,
    /// Firing of the enclosing graph that owns this handler; `None` for
    /// the root handler.
    pub parent: Option<FiringId>,
    pub repetition: u32,
    pub firings: Vec<FiringId>,
    /// True iff the graph has no dynamic parameter anywhere in its subtree.
    pub is_static: bool,
}

/// Per-firing snapshot of one graph: resolved parameters, repetition
/// vector, rate cache, task registers and the child handler slots.
///
/// Firings of a static graph share the repetition vector and rate cache of
/// firing 0 (copy elision); their own arrays stay empty and reads are
/// redirected.
pub struct GraphFiring {
    pub handler: HandlerId,
    pub firing: u32,
    pub params: Vec<FiringParam>,
    brv: Vec<u32>,
    rates: Vec<(i64, i64)>,
    task_ix: Vec<Vec<u32>>,
    /// Producer output FIFO registered per (edge, source firing) by the
    /// allocator.
    edge_fifos: Vec<Vec<Fifo>>,
    pub subgraph_handlers: Vec<Option<HandlerId>>,
    pub resolved: bool,
    pub dynamic_param_count: u32,
    pub param_resolved_count: u32,
}

/// Frozen parameter table of one firing, usable as an expression scope
/// without borrowing the arena.
pub struct SnapshotScope {
    entries: Vec<(String, i64, bool)>,
}

impl ParamTable for SnapshotScope {
    fn get(&self, name: &str) -> Option<ParamBinding> {
        self.entries
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|&(_, value, dynamic)| ParamBinding { value, dynamic })
    }
}

/// Arena owning the whole handler tree of one application instance.
///
/// Ownership is downward (handler -> firings -> child handlers); upward
/// links are plain ids resolved through the arena, never references.
pub struct Handlers {
    handlers: Vec<GraphHandler>,
    firings: Vec<GraphFiring>,
    root: HandlerId,
}

impl Handlers {
    pub fn new(app: &App) -> Self {
        let mut this = Self {
            handlers: Vec::new(),
            firings: Vec::new(),
            root: HandlerId(0),
        };
        this.root = this.create_handler(app, app.root(), None, 1);
        this
    }

    pub fn root(&self) -> HandlerId {
        self.root
    }

    pub fn handler(&self, id: HandlerId) -> &GraphHandler {
        &self.handlers[id.0 as usize]
    }

    pub fn firing(&self, id: FiringId) -> &GraphFiring {
        &self.firings[id.0 as usize]
    }

    pub fn graph_of(&self, id: FiringId) -> GraphId {
        self.handlers[self.firings[id.0 as usize].handler.0 as usize].graph
    }

    pub fn is_resolved(&self, id: FiringId) -> bool {
        self.firings[id.0 as usize].resolved
    }

    /// Firing index of this firing within its handler.
    pub fn firing_value(&self, id: FiringId) -> u32 {
        self.firings[id.0 as usize].firing
    }

    pub fn parent_firing(&self, id: FiringId) -> Option<FiringId> {
        self.handlers[self.firings[id.0 as usize].handler.0 as usize].parent
    }

    // =====================================================================
    // Construction
    // =====================================================================

    fn create_handler(
        &mut self,
        app: &App,
        graph: GraphId,
        parent: Option<FiringId>,
        repetition: u32,
    ) -> HandlerId {
        let id = HandlerId(self.handlers.len() as u32);
        let is_static = app.graph(graph).subtree_static;
        self.handlers.push(GraphHandler {
            graph,
            parent,
            repetition,
            firings: Vec::with_capacity(repetition as usize),
            is_static,
        });
        for k in 0..repetition {
            let firing = self.create_firing(app, id, k);
            self.handlers[id.0 as usize].firings.push(firing);
        }
        id
    }

    fn create_firing(&mut self, app: &App, handler: HandlerId, firing: u32) -> FiringId {
        let graph = app.graph(self.handlers[handler.0 as usize].graph);
        let parent = self.handlers[handler.0 as usize].parent;
        let mut params = Vec::with_capacity(graph.params.len());
        let mut dynamic_param_count = 0;
        for decl in &graph.params {
            let param = match decl.kind {
                ParamKind::Static => FiringParam {
                    kind: FiringParamKind::Value,
                    value: decl.value,
                    resolved: true,
                },
                ParamKind::Dynamic => {
                    dynamic_param_count += 1;
                    FiringParam {
                        kind: FiringParamKind::Dynamic,
                        value: 0,
                        resolved: false,
                    }
                }
                ParamKind::DynamicDependent => FiringParam {
                    kind: FiringParamKind::DynamicDependent,
                    value: 0,
                    resolved: false,
                },
                ParamKind::Inherited => {
                    let parent_firing =
                        parent.expect("inherited parameter outside the root graph");
                    let mut source = (
                        parent_firing,
                        decl.parent_ix.expect("validated at finalize"),
                    );
                    // Collapse chained inheritance to its first
                    // non-inherited ancestor.
                    while let FiringParamKind::Inherited { firing, ix } =
                        self.firings[source.0 .0 as usize].params[source.1].kind
                    {
                        source = (firing, ix);
                    }
                    FiringParam {
                        kind: FiringParamKind::Inherited {
                            firing: source.0,
                            ix: source.1,
                        },
                        value: 0,
                        resolved: true,
                    }
                }
            };
            params.push(param);
        }
        // Config actors are schedulable before resolution (their firing
        // count is one by construction), so their task slot exists upfront.
        let task_ix = graph
            .vertices
            .iter()
            .map(|v| {
                if matches!(v.kind, VertexKind::Config) {
                    vec![UNSET_IX; 1]
                } else {
                    Vec::new()
                }
            })
            .collect();
        let id = FiringId(self.firings.len() as u32);
        self.firings.push(GraphFiring {
            handler,
            firing,
            params,
            brv: Vec::new(),
            rates: Vec::new(),
            task_ix,
            edge_fifos: vec![Vec::new(); graph.edge_count()],
            subgraph_handlers: vec![None; graph.subgraph_count()],
            resolved: false,
            dynamic_param_count,
            param_resolved_count: 0,
        });
        id
    }

    // =====================================================================
    // Parameters
    // =====================================================================

    pub fn param_value(&self, firing: FiringId, ix: usize) -> i64 {
        let param = &self.firings[firing.0 as usize].params[ix];
        match param.kind {
            FiringParamKind::Inherited { firing, ix } => {
                self.firings[firing.0 as usize].params[ix].value
            }
            _ => param.value,
        }
    }

    /// Freeze the firing's parameter table for expression evaluation.
    pub fn scope(&self, app: &App, firing: FiringId) -> SnapshotScope {
        let graph = app.graph(self.graph_of(firing));
        let entries = graph
            .params
            .iter()
            .enumerate()
            .map(|(ix, decl)| {
                (
                    decl.name.clone(),
                    self.param_value(firing, ix),
                    decl.is_dynamic(),
                )
            })
            .collect();
        SnapshotScope { entries }
    }

    /// Set a dynamic parameter of a firing; when the last one lands the
    /// dependent parameters resolve and resolution cascades downward.
    pub fn set_param_value(
        &mut self,
        app: &App,
        firing: FiringId,
        ix: usize,
        value: i64,
    ) -> Result<()> {
        {
            let fr = &mut self.firings[firing.0 as usize];
            let param = &mut fr.params[ix];
            debug_assert!(matches!(param.kind, FiringParamKind::Dynamic));
            param.value = value;
            param.resolved = true;
            fr.param_resolved_count += 1;
        }
        let fr = &self.firings[firing.0 as usize];
        if fr.param_resolved_count == fr.dynamic_param_count {
            self.resolve_dynamic_dependent_params(app, firing)?;
            self.resolve_brv(app, firing)?;
            let children: Vec<HandlerId> = self.firings[firing.0 as usize]
                .subgraph_handlers
                .iter()
                .copied()
                .flatten()
                .collect();
            for child in children {
                self.resolve_firings(app, child)?;
            }
        }
        Ok(())
    }

    fn resolve_dynamic_dependent_params(&mut self, app: &App, firing: FiringId) -> Result<()> {
        let graph_id = self.graph_of(firing);
        let param_count = app.graph(graph_id).params.len();
        // Dependent parameters may chain on one another; iterate to a
        // fixpoint, bounded by the declaration count.
        for _ in 0..param_count.max(1) {
            let mut changed = false;
            for ix in 0..param_count {
                let decl = &app.graph(graph_id).params[ix];
                if decl.kind != ParamKind::DynamicDependent {
                    continue;
                }
                let value = {
                    let scope = self.scope(app, firing);
                    decl.expr
                        .as_ref()
                        .expect("dynamic-dependent parameter carries an expression")
                        .evaluate(&scope)?
                };
                let param = &mut self.firings[firing.0 as usize].params[ix];
                if !param.resolved || param.value != value {
                    param.value = value;
                    param.resolved = true;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        Ok(())
    }

    // =====================================================================
    // Resolution
    // =====================================================================

    /// Resolve everything currently resolvable, walking the whole tree.
    pub fn resolve_all(&mut self, app: &App) -> Result<()> {
        self.resolve_firings(app, self.root)
    }

    fn resolve_firings(&mut self, app: &App, handler: HandlerId) -> Result<()> {
        let firings = self.handlers[handler.0 as usize].firings.clone();
        for firing in firings {
            self.resolve_brv(app, firing)?;
            // Recurse into whatever children exist after resolution.
            let children: Vec<HandlerId> = self.firings[firing.0 as usize]
                .subgraph_handlers
                .iter()
                .copied()
                .flatten()
                .collect();
            for child in children {
                self.resolve_firings(app, child)?;
            }
        }
        Ok(())
    }

    /// Resolve this firing's repetition vector, rate cache and child
    /// handlers. No-op while its dynamic parameters are still pending, and
    /// for firings of a static graph other than firing 0 (those mirror
    /// firing 0).
    pub fn resolve_brv(&mut self, app: &App, firing: FiringId) -> Result<()> {
        if self.firings[firing.0 as usize].resolved {
            return Ok(());
        }
        let handler = self.firings[firing.0 as usize].handler;
        let is_static = self.handlers[handler.0 as usize].is_static;
        if is_static && self.firings[firing.0 as usize].firing > 0 {
            return Ok(());
        }
        {
            let fr = &self.firings[firing.0 as usize];
            if fr.param_resolved_count < fr.dynamic_param_count {
                return Ok(());
            }
            // Values mirrored from an ancestor must themselves be live.
            for param in &fr.params {
                if let FiringParamKind::Inherited { firing: source, ix } = param.kind {
                    if !self.firings[source.0 as usize].params[ix].resolved {
                        return Ok(());
                    }
                }
            }
        }
        self.resolve_dynamic_dependent_params(app, firing)?;
        let graph_id = self.handlers[handler.0 as usize].graph;
        let graph = app.graph(graph_id);
        let (rv, rates) = {
            let scope = self.scope(app, firing);
            let rv = brv::compute(graph, &scope)?;
            let mut rates = Vec::with_capacity(graph.edge_count());
            for edge in &graph.edges {
                rates.push((
                    edge.src_rate.evaluate(&scope)?,
                    edge.snk_rate.evaluate(&scope)?,
                ));
            }
            (rv, rates)
        };
        self.initialize_registers(app, firing, &rv);
        {
            let fr = &mut self.firings[firing.0 as usize];
            fr.brv = rv;
            fr.rates = rates;
        }
        self.create_or_update_subgraph_handlers(app, firing)?;
        self.firings[firing.0 as usize].resolved = true;
        trace!(firing = firing.0, graph = %graph.name, "firing resolved");
        if is_static {
            // Siblings mirror firing 0: share RV/rates, own their task
            // registers and child handlers.
            let siblings = self.handlers[handler.0 as usize].firings.clone();
            let rv = self.firings[firing.0 as usize].brv.clone();
            for &sibling in siblings.iter().skip(1) {
                self.initialize_registers(app, sibling, &rv);
                self.create_or_update_subgraph_handlers(app, sibling)?;
                self.firings[sibling.0 as usize].resolved = true;
            }
        }
        Ok(())
    }

    fn initialize_registers(&mut self, app: &App, firing: FiringId, rv: &[u32]) {
        let graph = app.graph(self.graph_of(firing));
        let fr = &mut self.firings[firing.0 as usize];
        // Resize, never rebuild: config actors may have been scheduled
        // (and registered) before this firing resolved.
        for (ix, vertex) in graph.vertices.iter().enumerate() {
            let slots = if vertex.is_executable() {
                rv[ix] as usize
            } else {
                0
            };
            fr.task_ix[ix].resize(slots, UNSET_IX);
        }
        for (ix, edge) in graph.edges.iter().enumerate() {
            let producer_rv = match graph.vertex(edge.source).kind {
                VertexKind::InputIf { .. } | VertexKind::OutputIf { .. } => 1,
                _ => rv[edge.source.0 as usize].max(1),
            };
            fr.edge_fifos[ix].resize(producer_rv as usize, Fifo::default());
        }
    }

    fn create_or_update_subgraph_handlers(&mut self, app: &App, firing: FiringId) -> Result<()> {
        let graph_id = self.graph_of(firing);
        let graph = app.graph(graph_id);
        for (sub_ix, &vertex) in graph.subgraphs.clone().iter().enumerate() {
            let child_graph = match graph.vertex(vertex).kind {
                VertexKind::Graph { graph, .. } => graph,
                _ => unreachable!("subgraph list holds graph vertices"),
            };
            let repetition = self.rv(app, firing, vertex);
            debug_assert_ne!(repetition, UNSET_IX);
            match self.firings[firing.0 as usize].subgraph_handlers[sub_ix] {
                Some(existing) if self.handlers[existing.0 as usize].repetition == repetition => {
                    self.resolve_firings(app, existing)?;
                }
                _ => {
                    let child = self.create_handler(app, child_graph, Some(firing), repetition);
                    self.firings[firing.0 as usize].subgraph_handlers[sub_ix] = Some(child);
                    self.resolve_firings(app, child)?;
                }
            }
        }
        Ok(())
    }

    /// Reset every task register and dynamic parameter for a new
    /// iteration. Static firings keep their resolution, dynamic ones
    /// return to the unresolved state.
    pub fn clear(&mut self, app: &App) {
        self.clear_handler(app, self.root);
    }

    fn clear_handler(&mut self, app: &App, handler: HandlerId) {
        let firings = self.handlers[handler.0 as usize].firings.clone();
        let is_static = self.handlers[handler.0 as usize].is_static;
        for firing in firings {
            {
                let fr = &mut self.firings[firing.0 as usize];
                for slots in &mut fr.task_ix {
                    slots.fill(UNSET_IX);
                }
                for fifos in &mut fr.edge_fifos {
                    fifos.fill(Fifo::default());
                }
                for param in &mut fr.params {
                    match param.kind {
                        FiringParamKind::Dynamic => {
                            param.value = 0;
                            param.resolved = false;
                        }
                        FiringParamKind::DynamicDependent => {
                            param.resolved = false;
                        }
                        _ => {}
                    }
                }
                fr.param_resolved_count = 0;
                fr.resolved = is_static;
                if !is_static {
                    // A reconfigurable firing forgets its counts; the next
                    // resolution recomputes them from live parameters.
                    fr.brv.clear();
                    fr.rates.clear();
                }
            }
            let children: Vec<HandlerId> = self.firings[firing.0 as usize]
                .subgraph_handlers
                .iter()
                .copied()
                .flatten()
                .collect();
            for child in children {
                self.clear_handler(app, child);
            }
        }
    }

    /// Dynamic parameters the driver still expects from config actors.
    pub fn count_expected_params(&self, app: &App) -> usize {
        self.count_handler_params(app, self.root)
    }

    fn count_handler_params(&self, app: &App, handler: HandlerId) -> usize {
        let h = &self.handlers[handler.0 as usize];
        let mut count = 0;
        for &firing in &h.firings {
            let fr = &self.firings[firing.0 as usize];
            if fr.resolved && fr.param_resolved_count == fr.dynamic_param_count {
                for child in fr.subgraph_handlers.iter().copied().flatten() {
                    count += self.count_handler_params(app, child);
                }
            } else {
                count += (fr.dynamic_param_count - fr.param_resolved_count) as usize;
            }
        }
        count
    }

    // =====================================================================
    // Accessors
    // =====================================================================

    /// Firing whose RV/rate arrays actually hold the data (copy elision).
    fn data_firing(&self, firing: FiringId) -> FiringId {
        let fr = &self.firings[firing.0 as usize];
        if fr.firing > 0 && self.handlers[fr.handler.0 as usize].is_static {
            self.handlers[fr.handler.0 as usize].firings[0]
        } else {
            firing
        }
    }

    /// Repetition value of a vertex under this firing; [`UNSET_IX`] while
    /// unresolved. Interfaces always report 1.
    pub fn rv(&self, app: &App, firing: FiringId, vertex: VertexId) -> u32 {
        let graph = app.graph(self.graph_of(firing));
        match graph.vertex(vertex).kind {
            VertexKind::InputIf { .. } | VertexKind::OutputIf { .. } => 1,
            VertexKind::Config => 1,
            _ => {
                let data = &self.firings[self.data_firing(firing).0 as usize];
                data.brv.get(vertex.0 as usize).copied().unwrap_or(UNSET_IX)
            }
        }
    }

    pub fn src_rate(&self, app: &App, firing: FiringId, edge: EdgeId) -> Result<i64> {
        let data = &self.firings[self.data_firing(firing).0 as usize];
        if let Some(&(src, _)) = data.rates.get(edge.0 as usize) {
            return Ok(src);
        }
        let graph = app.graph(self.graph_of(firing));
        let scope = self.scope(app, firing);
        graph.edge(edge).src_rate.evaluate(&scope)
    }

    pub fn snk_rate(&self, app: &App, firing: FiringId, edge: EdgeId) -> Result<i64> {
        let data = &self.firings[self.data_firing(firing).0 as usize];
        if let Some(&(_, snk)) = data.rates.get(edge.0 as usize) {
            return Ok(snk);
        }
        let graph = app.graph(self.graph_of(firing));
        let scope = self.scope(app, firing);
        graph.edge(edge).snk_rate.evaluate(&scope)
    }

    pub fn delay_value(&self, app: &App, firing: FiringId, edge: EdgeId) -> Result<i64> {
        let graph = app.graph(self.graph_of(firing));
        match &graph.edge(edge).delay {
            None => Ok(0),
            Some(delay) => {
                let scope = self.scope(app, firing);
                delay.value.evaluate(&scope)
            }
        }
    }

    pub fn task_ix(&self, firing: FiringId, vertex: VertexId, k: u32) -> u32 {
        self.firings[firing.0 as usize].task_ix[vertex.0 as usize]
            .get(k as usize)
            .copied()
            .unwrap_or(UNSET_IX)
    }

    pub fn set_task_ix(&mut self, firing: FiringId, vertex: VertexId, k: u32, task: u32) {
        let slots = &mut self.firings[firing.0 as usize].task_ix[vertex.0 as usize];
        if let Some(slot) = slots.get_mut(k as usize) {
            *slot = task;
        }
    }

    /// Child firing of a subgraph vertex.
    pub fn subgraph_firing(
        &self,
        app: &App,
        firing: FiringId,
        vertex: VertexId,
        k: u32,
    ) -> Option<FiringId> {
        let graph = app.graph(self.graph_of(firing));
        let sub_ix = match graph.vertex(vertex).kind {
            VertexKind::Graph { sub_ix, .. } => sub_ix as usize,
            _ => return None,
        };
        let handler = self.firings[firing.0 as usize].subgraph_handlers[sub_ix]?;
        self.handlers[handler.0 as usize]
            .firings
            .get(k as usize)
            .copied()
    }

    pub fn edge_fifo(&self, firing: FiringId, edge: EdgeId, src_firing: u32) -> Fifo {
        self.firings[firing.0 as usize].edge_fifos[edge.0 as usize]
            .get(src_firing as usize)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_edge_fifo(&mut self, firing: FiringId, edge: EdgeId, src_firing: u32, fifo: Fifo) {
        let slots = &mut self.firings[firing.0 as usize].edge_fifos[edge.0 as usize];
        if slots.len() <= src_firing as usize {
            // Config outputs register before their firing resolves.
            slots.resize(src_firing as usize + 1, Fifo::default());
        }
        slots[src_firing as usize] = fifo;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archi::Platform;
    use crate::core::graph::AppBuilder;
    use crate::core::param::Param;

    fn platform() -> Platform {
        let mut builder = Platform::builder();
        let hw = builder.add_hw_type("x86");
        let cluster = builder.add_cluster("main");
        builder.add_pe("P0", hw, cluster);
        builder.build().unwrap()
    }

    fn static_two_level() -> (App, VertexId, VertexId, crate::core::graph::GraphId) {
        let platform = platform();
        let mut b = AppBuilder::new("app", &platform);
        let g = b.root();
        let a = b.add_actor(g, "A", 0, 1);
        let (sub_vertex, sub) = b.add_subgraph(g, "S", 1, 0);
        b.connect_const(g, a, 0, sub_vertex, 0, 4, 2).unwrap();
        let inner = b.add_actor(sub, "V", 1, 0);
        let in_if = b.input_interface(sub, 0);
        b.connect_const(sub, in_if, 0, inner, 0, 2, 1).unwrap();
        (b.finalize().unwrap(), a, inner, sub)
    }

    #[test]
    fn static_tree_resolves_fully() {
        let (app, a, inner, _sub) = static_two_level();
        let mut handlers = Handlers::new(&app);
        handlers.resolve_all(&app).unwrap();
        let root_handler = handlers.handler(handlers.root());
        assert_eq!(root_handler.repetition, 1);
        let root_firing = root_handler.firings[0];
        assert!(handlers.is_resolved(root_firing));
        // A fires twice (4 tokens, subgraph consumes 2 per firing).
        assert_eq!(handlers.rv(&app, root_firing, a), 2);
        // Subgraph fires twice; each child firing runs V twice.
        let sub_vertex = app.graph(app.root()).subgraphs[0];
        assert_eq!(handlers.rv(&app, root_firing, sub_vertex), 2);
        let child0 = handlers
            .subgraph_firing(&app, root_firing, sub_vertex, 0)
            .unwrap();
        let child1 = handlers
            .subgraph_firing(&app, root_firing, sub_vertex, 1)
            .unwrap();
        assert!(handlers.is_resolved(child0));
        assert!(handlers.is_resolved(child1));
        assert_eq!(handlers.rv(&app, child0, inner), 2);
        assert_eq!(handlers.rv(&app, child1, inner), 2);
    }

    #[test]
    fn static_siblings_share_rv_data() {
        let (app, _a, inner, _sub) = static_two_level();
        let mut handlers = Handlers::new(&app);
        handlers.resolve_all(&app).unwrap();
        let root_firing = handlers.handler(handlers.root()).firings[0];
        let sub_vertex = app.graph(app.root()).subgraphs[0];
        let child1 = handlers
            .subgraph_firing(&app, root_firing, sub_vertex, 1)
            .unwrap();
        // Firing 1 of the static subgraph mirrors firing 0.
        assert!(handlers.firing(child1).brv.is_empty());
        assert_eq!(handlers.rv(&app, child1, inner), 2);
    }

    #[test]
    fn resolve_clear_resolve_round_trips() {
        let (app, a, _inner, _sub) = static_two_level();
        let mut handlers = Handlers::new(&app);
        handlers.resolve_all(&app).unwrap();
        let root_firing = handlers.handler(handlers.root()).firings[0];
        let rv_before = handlers.rv(&app, root_firing, a);
        handlers.set_task_ix(root_firing, a, 0, 7);
        handlers.clear(&app);
        assert_eq!(handlers.task_ix(root_firing, a, 0), UNSET_IX);
        assert!(handlers.is_resolved(root_firing));
        handlers.resolve_all(&app).unwrap();
        assert_eq!(handlers.rv(&app, root_firing, a), rv_before);
    }

    #[test]
    fn dynamic_firing_waits_for_params() {
        let platform = platform();
        let mut b = AppBuilder::new("dyn", &platform);
        let g = b.root();
        let n = b.add_param(g, Param::dynamic("n"));
        let cfg = b.add_config(g, "C", 0, 0);
        b.set_output_params(g, cfg, &[n]);
        let a = b.add_actor(g, "A", 0, 1);
        let v = b.add_actor(g, "B", 1, 0);
        b.connect(g, a, 0, v, 0, "n", "1").unwrap();
        let app = b.finalize().unwrap();
        let mut handlers = Handlers::new(&app);
        handlers.resolve_all(&app).unwrap();
        let root_firing = handlers.handler(handlers.root()).firings[0];
        assert!(!handlers.is_resolved(root_firing));
        assert_eq!(handlers.count_expected_params(&app), 1);
        handlers.set_param_value(&app, root_firing, n, 3).unwrap();
        assert!(handlers.is_resolved(root_firing));
        assert_eq!(handlers.rv(&app, root_firing, v), 3);
        assert_eq!(handlers.count_expected_params(&app), 0);
    }

    #[test]
    fn inherited_params_chase_the_chain() {
        let platform = platform();
        let mut b = AppBuilder::new("inherit", &platform);
        let g = b.root();
        let n = b.add_param(g, Param::fixed("n", 6));
        let (sv, sub) = b.add_subgraph(g, "S", 0, 0);
        let inner_n = b.add_param(sub, Param::inherited("n", n));
        let (sv2, sub2) = b.add_subgraph(sub, "T", 0, 0);
        b.add_param(sub2, Param::inherited("n", inner_n));
        let v = b.add_actor(sub2, "V", 0, 1);
        let w = b.add_actor(sub2, "W", 1, 0);
        b.connect(sub2, v, 0, w, 0, "1", "n").unwrap();
        let _ = (sv, sv2);
        let app = b.finalize().unwrap();
        let mut handlers = Handlers::new(&app);
        handlers.resolve_all(&app).unwrap();
        let root_firing = handlers.handler(handlers.root()).firings[0];
        let sv = app.graph(app.root()).subgraphs[0];
        let mid = handlers.subgraph_firing(&app, root_firing, sv, 0).unwrap();
        let sv2 = app.graph(handlers.graph_of(mid)).subgraphs[0];
        let leaf = handlers.subgraph_firing(&app, mid, sv2, 0).unwrap();
        assert_eq!(handlers.rv(&app, leaf, v), 6);
        assert_eq!(handlers.rv(&app, leaf, w), 1);
        let _ = sub;
    }
}

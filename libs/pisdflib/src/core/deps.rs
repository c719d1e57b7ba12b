//! Execution and consumer dependency resolution across hierarchy and
//! delays, without materialising a single-rate graph.
//!
//! Both resolvers are lazy sequences driven by an explicit work-stack of
//! `(firing, edge, byte interval)` frames. Exec frames carry sink-timeline
//! positions (initial delay tokens occupy `[0, delay)`); consumer frames
//! carry the same coordinates, which is why construction shifts the
//! producer window by `+delay`.

use crate::core::error::{PisdfError, Result};
use crate::core::firing::{FiringId, Handlers, UNSET_IX};
use crate::core::graph::{App, EdgeId, VertexId, VertexKind};
use crate::core::math::{floor_div, floor_mod};

/// One resolved dependency interval.
///
/// An unresolved record (child handler not resolved yet) has `vertex: None`
/// and saturated index fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecDependency {
    pub vertex: Option<(FiringId, VertexId)>,
    pub rate: i64,
    /// Port index on the dependency's vertex (output port for exec
    /// dependencies, input port for consumer dependencies).
    pub edge_ix: u32,
    pub firing_start: u32,
    pub firing_end: u32,
    pub memory_start: u32,
    pub memory_end: u32,
}

impl ExecDependency {
    pub fn unresolved() -> Self {
        Self {
            vertex: None,
            rate: -1,
            edge_ix: u32::MAX,
            firing_start: u32::MAX,
            firing_end: u32::MAX,
            memory_start: u32::MAX,
            memory_end: u32::MAX,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.vertex.is_none()
    }

    /// Number of (vertex, firing) pairs covered.
    pub fn firing_count(&self) -> i64 {
        if self.is_unresolved() {
            return 0;
        }
        i64::from(self.firing_end) - i64::from(self.firing_start) + 1
    }

    /// Bytes contributed by one covered firing.
    pub fn bytes_for_firing(&self, k: u32) -> i64 {
        if self.is_unresolved() || self.rate <= 0 {
            return 0;
        }
        let start = if k == self.firing_start {
            i64::from(self.memory_start)
        } else {
            0
        };
        let end = if k == self.firing_end {
            i64::from(self.memory_end)
        } else {
            self.rate - 1
        };
        end - start + 1
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    firing: FiringId,
    edge: EdgeId,
    lower: i64,
    upper: i64,
}

enum Expansion {
    Dep(ExecDependency),
    Frames(Vec<Frame>),
    Mixed(Vec<Result<ExecDependency>>, Vec<Frame>),
    Nothing,
}

// =========================================================================
// Execution dependencies
// =========================================================================

/// Producers contributing bytes to input port `port` of `vertex[k]`.
pub fn exec_dependencies<'a>(
    app: &'a App,
    handlers: &'a Handlers,
    firing: FiringId,
    vertex: VertexId,
    k: u32,
    port: usize,
) -> Result<ExecDependencyIter<'a>> {
    let graph = app.graph(handlers.graph_of(firing));
    let edge = graph
        .vertex(vertex)
        .input_edge(port)
        .ok_or_else(|| PisdfError::InvalidGraph("dangling input port".into()))?;
    let rate = handlers.snk_rate(app, firing, edge)?;
    let mut stack = Vec::new();
    if rate > 0 {
        stack.push(Frame {
            firing,
            edge,
            lower: rate * i64::from(k),
            upper: rate * (i64::from(k) + 1) - 1,
        });
    }
    Ok(ExecDependencyIter {
        app,
        handlers,
        stack,
        pending: Vec::new(),
    })
}

/// Total number of (producer, firing) pairs; `-1` when any branch is
/// unresolved.
pub fn exec_dependency_count(
    app: &App,
    handlers: &Handlers,
    firing: FiringId,
    vertex: VertexId,
    k: u32,
    port: usize,
) -> Result<i64> {
    let mut count = 0;
    for dep in exec_dependencies(app, handlers, firing, vertex, k, port)? {
        let dep = dep?;
        if dep.is_unresolved() {
            return Ok(-1);
        }
        if dep.rate > 0 {
            count += dep.firing_count();
        }
    }
    Ok(count)
}

pub struct ExecDependencyIter<'a> {
    app: &'a App,
    handlers: &'a Handlers,
    stack: Vec<Frame>,
    pending: Vec<Result<ExecDependency>>,
}

impl Iterator for ExecDependencyIter<'_> {
    type Item = Result<ExecDependency>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(dep) = self.pending.pop() {
                return Some(dep);
            }
            let frame = self.stack.pop()?;
            match self.expand(frame) {
                Ok(Expansion::Dep(dep)) => return Some(Ok(dep)),
                Ok(Expansion::Frames(frames)) => {
                    self.stack.extend(frames.into_iter().rev());
                }
                Ok(Expansion::Mixed(mut deps, frames)) => {
                    deps.reverse();
                    self.pending = deps;
                    self.stack.extend(frames.into_iter().rev());
                }
                Ok(Expansion::Nothing) => {}
                Err(error) => {
                    self.stack.clear();
                    return Some(Err(error));
                }
            }
        }
    }
}

impl ExecDependencyIter<'_> {
    fn expand(&self, frame: Frame) -> Result<Expansion> {
        let (app, handlers) = (self.app, self.handlers);
        let graph = app.graph(handlers.graph_of(frame.firing));
        let edge = graph.edge(frame.edge);
        let source = graph.vertex(edge.source);
        let src_rate = handlers.src_rate(app, frame.firing, frame.edge)?;
        let delay = handlers.delay_value(app, frame.firing, frame.edge)?;

        if let VertexKind::Delay { edge: main_edge } = source.kind {
            // Getter-side read: follow the delayed edge, offset past the
            // bytes its sink consumes.
            let main = graph.edge(main_edge);
            let main_src_rate = handlers.src_rate(app, frame.firing, main_edge)?;
            let main_snk_rate = handlers.snk_rate(app, frame.firing, main_edge)?;
            let (anchor, past_output) =
                if matches!(graph.vertex(main.sink).kind, VertexKind::OutputIf { .. }) {
                    (main.source, true)
                } else {
                    (main.sink, false)
                };
            let anchor_rv = handlers.rv(app, frame.firing, anchor);
            if anchor_rv == UNSET_IX {
                return Ok(Expansion::Dep(ExecDependency::unresolved()));
            }
            let offset = if past_output {
                main_src_rate * i64::from(anchor_rv) - main_snk_rate
            } else {
                main_snk_rate * i64::from(anchor_rv)
            };
            return Ok(Expansion::Frames(vec![Frame {
                firing: frame.firing,
                edge: main_edge,
                lower: frame.lower + offset,
                upper: frame.upper + offset,
            }]));
        }

        if frame.lower >= delay {
            if src_rate <= 0 {
                return Ok(Expansion::Nothing);
            }
            let firing_start = floor_div(frame.lower - delay, src_rate);
            let firing_end = floor_div(frame.upper - delay, src_rate);
            match source.kind {
                VertexKind::InputIf { port } => {
                    // Promote each repetition chunk to the enclosing graph.
                    let parent_firing = handlers
                        .parent_firing(frame.firing)
                        .ok_or_else(|| PisdfError::InvalidGraph("interface at root".into()))?;
                    let (_, graph_vertex) =
                        graph.parent.expect("interface graph has a parent");
                    let parent_graph = app.graph(handlers.graph_of(parent_firing));
                    let outer_edge = parent_graph
                        .vertex(graph_vertex)
                        .input_edge(port as usize)
                        .ok_or_else(|| PisdfError::InvalidGraph("dangling interface".into()))?;
                    let base = src_rate * i64::from(handlers.firing_value(frame.firing));
                    let mut frames = Vec::new();
                    for j in firing_start..=firing_end {
                        let start = if j == firing_start {
                            floor_mod(frame.lower - delay, src_rate)
                        } else {
                            0
                        };
                        let end = if j == firing_end {
                            floor_mod(frame.upper - delay, src_rate)
                        } else {
                            src_rate - 1
                        };
                        frames.push(Frame {
                            firing: parent_firing,
                            edge: outer_edge,
                            lower: base + start,
                            upper: base + end,
                        });
                    }
                    Ok(Expansion::Frames(frames))
                }
                VertexKind::Graph { graph: child_graph, .. } => {
                    let mut deps = Vec::new();
                    let mut frames = Vec::new();
                    for j in firing_start..=firing_end {
                        let child =
                            handlers.subgraph_firing(app, frame.firing, edge.source, j as u32);
                        let Some(child) = child.filter(|&c| handlers.is_resolved(c)) else {
                            deps.push(Ok(ExecDependency::unresolved()));
                            continue;
                        };
                        let inner_graph = app.graph(child_graph);
                        let interface =
                            inner_graph.output_interfaces[edge.source_port as usize];
                        let inner_edge = inner_graph
                            .vertex(interface)
                            .input_edge(0)
                            .ok_or_else(|| {
                                PisdfError::InvalidGraph("dangling output interface".into())
                            })?;
                        let if_source = inner_graph.edge(inner_edge).source;
                        let if_src_rv = i64::from(handlers.rv(app, child, if_source));
                        let if_src_rate = handlers.src_rate(app, child, inner_edge)?;
                        let if_delay = handlers.delay_value(app, child, inner_edge)?;
                        let start = if j == firing_start {
                            floor_mod(frame.lower - delay, src_rate)
                        } else {
                            0
                        };
                        let end = if j == firing_end {
                            floor_mod(frame.upper - delay, src_rate)
                        } else {
                            src_rate - 1
                        };
                        let window = if_src_rv * if_src_rate - src_rate;
                        frames.push(Frame {
                            firing: child,
                            edge: inner_edge,
                            lower: window + start + if_delay,
                            upper: window + end + if_delay,
                        });
                    }
                    Ok(Expansion::Mixed(deps, frames))
                }
                _ => Ok(Expansion::Dep(ExecDependency {
                    vertex: Some((frame.firing, edge.source)),
                    rate: src_rate,
                    edge_ix: edge.source_port,
                    firing_start: firing_start as u32,
                    firing_end: firing_end as u32,
                    memory_start: floor_mod(frame.lower - delay, src_rate) as u32,
                    memory_end: floor_mod(frame.upper - delay, src_rate) as u32,
                })),
            }
        } else {
            let setter_edge = edge.delay.as_ref().and_then(|d| d.setter_edge);
            let Some(setter_edge) = setter_edge else {
                return Err(PisdfError::DelayUnderflow {
                    vertex: graph.vertex(edge.sink).name.clone(),
                    firing: handlers.firing_value(frame.firing),
                    missing: delay - frame.lower,
                });
            };
            if frame.upper < delay {
                // Initial tokens only.
                Ok(Expansion::Frames(vec![Frame {
                    firing: frame.firing,
                    edge: setter_edge,
                    lower: frame.lower,
                    upper: frame.upper,
                }]))
            } else {
                // Initial tokens then live production.
                Ok(Expansion::Frames(vec![
                    Frame {
                        firing: frame.firing,
                        edge: setter_edge,
                        lower: frame.lower,
                        upper: delay - 1,
                    },
                    Frame {
                        firing: frame.firing,
                        edge: frame.edge,
                        lower: delay,
                        upper: frame.upper,
                    },
                ]))
            }
        }
    }
}

// =========================================================================
// Consumer dependencies
// =========================================================================

/// Consumers reading the bytes produced on output port `port` of
/// `vertex[k]`.
pub fn cons_dependencies<'a>(
    app: &'a App,
    handlers: &'a Handlers,
    firing: FiringId,
    vertex: VertexId,
    k: u32,
    port: usize,
) -> Result<ConsDependencyIter<'a>> {
    let graph = app.graph(handlers.graph_of(firing));
    let edge = graph
        .vertex(vertex)
        .output_edge(port)
        .ok_or_else(|| PisdfError::InvalidGraph("dangling output port".into()))?;
    let rate = handlers.src_rate(app, firing, edge)?;
    let delay = handlers.delay_value(app, firing, edge)?;
    let mut stack = Vec::new();
    if rate > 0 {
        stack.push(Frame {
            firing,
            edge,
            lower: rate * i64::from(k) + delay,
            upper: rate * (i64::from(k) + 1) - 1 + delay,
        });
    }
    Ok(ConsDependencyIter {
        app,
        handlers,
        stack,
        pending: Vec::new(),
    })
}

/// Total number of (consumer, firing) pairs; `-1` when any branch is
/// unresolved.
pub fn cons_dependency_count(
    app: &App,
    handlers: &Handlers,
    firing: FiringId,
    vertex: VertexId,
    k: u32,
    port: usize,
) -> Result<i64> {
    let mut count = 0;
    for dep in cons_dependencies(app, handlers, firing, vertex, k, port)? {
        let dep = dep?;
        if dep.is_unresolved() {
            return Ok(-1);
        }
        if dep.rate > 0 {
            count += dep.firing_count();
        }
    }
    Ok(count)
}

pub struct ConsDependencyIter<'a> {
    app: &'a App,
    handlers: &'a Handlers,
    stack: Vec<Frame>,
    pending: Vec<Result<ExecDependency>>,
}

impl Iterator for ConsDependencyIter<'_> {
    type Item = Result<ExecDependency>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(dep) = self.pending.pop() {
                return Some(dep);
            }
            let frame = self.stack.pop()?;
            match self.expand(frame) {
                Ok(Expansion::Dep(dep)) => return Some(Ok(dep)),
                Ok(Expansion::Frames(frames)) => {
                    self.stack.extend(frames.into_iter().rev());
                }
                Ok(Expansion::Mixed(mut deps, frames)) => {
                    deps.reverse();
                    self.pending = deps;
                    self.stack.extend(frames.into_iter().rev());
                }
                Ok(Expansion::Nothing) => {}
                Err(error) => {
                    self.stack.clear();
                    return Some(Err(error));
                }
            }
        }
    }
}

impl ConsDependencyIter<'_> {
    fn expand(&self, frame: Frame) -> Result<Expansion> {
        let (app, handlers) = (self.app, self.handlers);
        let graph = app.graph(handlers.graph_of(frame.firing));
        let edge = graph.edge(frame.edge);
        let sink = graph.vertex(edge.sink);
        let snk_rate = handlers.snk_rate(app, frame.firing, frame.edge)?;

        if let VertexKind::Delay { edge: main_edge } = sink.kind {
            // Setter production: the bytes become the initial tokens of the
            // delayed edge and keep their positions there.
            return Ok(Expansion::Frames(vec![Frame {
                firing: frame.firing,
                edge: main_edge,
                lower: frame.lower,
                upper: frame.upper,
            }]));
        }

        if let VertexKind::OutputIf { port } = sink.kind {
            // Only the last window of production leaves the graph.
            let src_rate = handlers.src_rate(app, frame.firing, frame.edge)?;
            let delay = handlers.delay_value(app, frame.firing, frame.edge)?;
            let source_rv = handlers.rv(app, frame.firing, edge.source);
            if source_rv == UNSET_IX {
                return Ok(Expansion::Dep(ExecDependency::unresolved()));
            }
            let produced_end = src_rate * i64::from(source_rv) + delay;
            let window_lo = produced_end - snk_rate;
            let lower = frame.lower.max(window_lo);
            let upper = frame.upper.min(produced_end - 1);
            if lower > upper {
                return Ok(Expansion::Nothing);
            }
            let parent_firing = handlers
                .parent_firing(frame.firing)
                .ok_or_else(|| PisdfError::InvalidGraph("interface at root".into()))?;
            let (_, graph_vertex) = graph.parent.expect("interface graph has a parent");
            let parent_graph = app.graph(handlers.graph_of(parent_firing));
            let outer_edge = parent_graph
                .vertex(graph_vertex)
                .output_edge(port as usize)
                .ok_or_else(|| PisdfError::InvalidGraph("dangling interface".into()))?;
            let outer_delay = handlers.delay_value(app, parent_firing, outer_edge)?;
            let base =
                snk_rate * i64::from(handlers.firing_value(frame.firing)) + outer_delay;
            return Ok(Expansion::Frames(vec![Frame {
                firing: parent_firing,
                edge: outer_edge,
                lower: base + (lower - window_lo),
                upper: base + (upper - window_lo),
            }]));
        }

        if snk_rate <= 0 {
            return Ok(Expansion::Nothing);
        }

        // Bytes past the sink's total consumption feed the delay getter.
        let sink_rv = handlers.rv(app, frame.firing, edge.sink);
        if sink_rv == UNSET_IX {
            // The sink's firing count is still pending resolution.
            return Ok(Expansion::Dep(ExecDependency::unresolved()));
        }
        let total = snk_rate * i64::from(sink_rv);
        let mut frames = Vec::new();
        let mut deps = Vec::new();
        if frame.upper >= total {
            let getter_edge = edge.delay.as_ref().and_then(|d| d.getter_edge);
            let Some(getter_edge) = getter_edge else {
                return Err(PisdfError::FifoSizeMismatch {
                    edge: format!(
                        "{}->{}",
                        graph.vertex(edge.source).name,
                        graph.vertex(edge.sink).name
                    ),
                    produced: frame.upper + 1,
                    consumed: total,
                });
            };
            frames.push(Frame {
                firing: frame.firing,
                edge: getter_edge,
                lower: frame.lower.max(total) - total,
                upper: frame.upper - total,
            });
        }
        let lower = frame.lower;
        let upper = frame.upper.min(total - 1);
        if lower <= upper {
            match sink.kind {
                VertexKind::Graph { graph: child_graph, .. } => {
                    let firing_start = floor_div(lower, snk_rate);
                    let firing_end = floor_div(upper, snk_rate);
                    for j in firing_start..=firing_end {
                        let child =
                            handlers.subgraph_firing(app, frame.firing, edge.sink, j as u32);
                        let Some(child) = child.filter(|&c| handlers.is_resolved(c)) else {
                            deps.push(Ok(ExecDependency::unresolved()));
                            continue;
                        };
                        let inner_graph = app.graph(child_graph);
                        let interface = inner_graph.input_interfaces[edge.sink_port as usize];
                        let inner_edge = inner_graph
                            .vertex(interface)
                            .output_edge(0)
                            .ok_or_else(|| {
                                PisdfError::InvalidGraph("dangling input interface".into())
                            })?;
                        let inner = inner_graph.edge(inner_edge);
                        let window = handlers.src_rate(app, child, inner_edge)?;
                        let inner_delay = handlers.delay_value(app, child, inner_edge)?;
                        let inner_total = handlers.snk_rate(app, child, inner_edge)?
                            * i64::from(handlers.rv(app, child, inner.sink));
                        let start = if j == firing_start {
                            floor_mod(lower, snk_rate)
                        } else {
                            0
                        };
                        let end = if j == firing_end {
                            floor_mod(upper, snk_rate)
                        } else {
                            snk_rate - 1
                        };
                        if window <= 0 {
                            continue;
                        }
                        // The input interface repeats its window; every
                        // repetition overlapping the inner consumption
                        // re-reads the same outer bytes.
                        let mut repeat = 0;
                        loop {
                            let offset = inner_delay + repeat * window;
                            if offset + start >= inner_total {
                                break;
                            }
                            frames.push(Frame {
                                firing: child,
                                edge: inner_edge,
                                lower: offset + start,
                                upper: (offset + end).min(inner_total - 1),
                            });
                            repeat += 1;
                        }
                    }
                }
                _ => {
                    deps.push(Ok(ExecDependency {
                        vertex: Some((frame.firing, edge.sink)),
                        rate: snk_rate,
                        edge_ix: edge.sink_port,
                        firing_start: floor_div(lower, snk_rate) as u32,
                        firing_end: floor_div(upper, snk_rate) as u32,
                        memory_start: floor_mod(lower, snk_rate) as u32,
                        memory_end: floor_mod(upper, snk_rate) as u32,
                    }));
                }
            }
        }
        Ok(Expansion::Mixed(deps, frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archi::Platform;
    use crate::core::graph::AppBuilder;

    fn platform() -> Platform {
        let mut builder = Platform::builder();
        let hw = builder.add_hw_type("x86");
        let cluster = builder.add_cluster("main");
        builder.add_pe("P0", hw, cluster);
        builder.build().unwrap()
    }

    fn resolve(app: &App) -> (Handlers, FiringId) {
        let mut handlers = Handlers::new(app);
        handlers.resolve_all(app).unwrap();
        let root = handlers.handler(handlers.root()).firings[0];
        (handlers, root)
    }

    fn collect_exec(
        app: &App,
        handlers: &Handlers,
        firing: FiringId,
        vertex: VertexId,
        k: u32,
        port: usize,
    ) -> Vec<ExecDependency> {
        exec_dependencies(app, handlers, firing, vertex, k, port)
            .unwrap()
            .map(|d| d.unwrap())
            .collect()
    }

    #[test]
    fn direct_edge_dependencies() {
        let platform = platform();
        let mut b = AppBuilder::new("direct", &platform);
        let g = b.root();
        let a = b.add_actor(g, "A", 0, 1);
        let v = b.add_actor(g, "B", 1, 0);
        b.connect_const(g, a, 0, v, 0, 2, 3).unwrap();
        let app = b.finalize().unwrap();
        let (handlers, root) = resolve(&app);
        // rv(A)=3, rv(B)=2. B[1] reads bytes [3..5] -> A firings 1..2.
        let deps = collect_exec(&app, &handlers, root, v, 1, 0);
        assert_eq!(deps.len(), 1);
        let dep = deps[0];
        assert_eq!(dep.vertex, Some((root, a)));
        assert_eq!((dep.firing_start, dep.firing_end), (1, 2));
        assert_eq!((dep.memory_start, dep.memory_end), (1, 1));
        assert_eq!(dep.rate, 2);
        assert_eq!(
            exec_dependency_count(&app, &handlers, root, v, 1, 0).unwrap(),
            2
        );
    }

    #[test]
    fn delayed_edge_splits_between_init_and_producer() {
        // Scenario: A(1) -> [delay 2] -> B(1), rv(A)=rv(B)=4.
        let platform = platform();
        let mut b = AppBuilder::new("delayed", &platform);
        let g = b.root();
        let pace = b.add_actor(g, "pace", 0, 1);
        let a = b.add_actor(g, "A", 1, 1);
        let v = b.add_actor(g, "B", 1, 0);
        b.connect_const(g, pace, 0, a, 0, 4, 1).unwrap();
        let e = b.connect_const(g, a, 0, v, 0, 1, 1).unwrap();
        b.add_delay(g, e, "2", true).unwrap();
        let app = b.finalize().unwrap();
        let (handlers, root) = resolve(&app);
        assert_eq!(handlers.rv(&app, root, a), 4);
        assert_eq!(handlers.rv(&app, root, v), 4);
        // B[0] and B[1] read the initial tokens through INIT.
        let graph = app.graph(app.root());
        let init = graph
            .vertices
            .iter()
            .find(|x| matches!(x.kind, VertexKind::Init { .. }))
            .unwrap()
            .ix;
        let deps = collect_exec(&app, &handlers, root, v, 0, 0);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].vertex, Some((root, init)));
        assert_eq!((deps[0].memory_start, deps[0].memory_end), (0, 0));
        let deps = collect_exec(&app, &handlers, root, v, 1, 0);
        assert_eq!(deps[0].vertex, Some((root, init)));
        assert_eq!((deps[0].memory_start, deps[0].memory_end), (1, 1));
        // B[2] reads byte 0 of A.
        let deps = collect_exec(&app, &handlers, root, v, 2, 0);
        assert_eq!(deps[0].vertex, Some((root, a)));
        assert_eq!((deps[0].firing_start, deps[0].firing_end), (0, 0));
    }

    #[test]
    fn straddling_read_yields_setter_then_source() {
        // delay 2, B consumes 3 per firing: B[0] reads setter bytes {0,1}
        // then A byte {0}.
        let platform = platform();
        let mut b = AppBuilder::new("straddle", &platform);
        let g = b.root();
        let s = b.add_actor(g, "S", 0, 1);
        let a = b.add_actor(g, "A", 0, 1);
        let v = b.add_actor(g, "B", 1, 0);
        let e = b.connect_const(g, a, 0, v, 0, 1, 3).unwrap();
        b.add_delay_with(g, e, "2", false, Some((s, 0, "2")), None)
            .unwrap();
        let app = b.finalize().unwrap();
        let (handlers, root) = resolve(&app);
        let deps = collect_exec(&app, &handlers, root, v, 0, 0);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].vertex, Some((root, s)));
        assert_eq!((deps[0].memory_start, deps[0].memory_end), (0, 1));
        assert_eq!(deps[1].vertex, Some((root, a)));
        assert_eq!((deps[1].firing_start, deps[1].firing_end), (0, 0));
    }

    #[test]
    fn missing_setter_underflows() {
        let platform = platform();
        let mut b = AppBuilder::new("underflow", &platform);
        let g = b.root();
        let a = b.add_actor(g, "A", 0, 1);
        let v = b.add_actor(g, "B", 1, 0);
        let gtr = b.add_actor(g, "G", 1, 0);
        let e = b.connect_const(g, a, 0, v, 0, 1, 1).unwrap();
        b.add_delay_with(g, e, "2", false, None, Some((gtr, 0, "2")))
            .unwrap();
        let app = b.finalize().unwrap();
        let (handlers, root) = resolve(&app);
        let err = exec_dependencies(&app, &handlers, root, v, 0, 0)
            .unwrap()
            .next()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PisdfError::DelayUnderflow { .. }));
    }

    #[test]
    fn getter_reads_residual_tokens() {
        // A produces 4, B consumes 2 (rv 2)... with delay 2 the last two
        // production bytes drain through the getter.
        let platform = platform();
        let mut b = AppBuilder::new("getter", &platform);
        let g = b.root();
        let s = b.add_actor(g, "S", 0, 1);
        let gtr = b.add_actor(g, "G", 1, 0);
        let a = b.add_actor(g, "A", 0, 1);
        let v = b.add_actor(g, "B", 1, 0);
        let e = b.connect_const(g, a, 0, v, 0, 4, 2).unwrap();
        b.add_delay_with(g, e, "2", false, Some((s, 0, "2")), Some((gtr, 0, "2")))
            .unwrap();
        let app = b.finalize().unwrap();
        let (handlers, root) = resolve(&app);
        // rv(A)=1, rv(B)=2 from the 4->2 edge... consumption = 4, tokens =
        // 2 + 4: the last 2 bytes of A's production reach G.
        let cons: Vec<_> = cons_dependencies(&app, &handlers, root, a, 0, 0)
            .unwrap()
            .map(|d| d.unwrap())
            .collect();
        assert_eq!(cons.len(), 2);
        assert_eq!(cons[0].vertex, Some((root, v)));
        assert_eq!((cons[0].firing_start, cons[0].firing_end), (1, 1));
        assert_eq!(cons[1].vertex, Some((root, gtr)));
        assert_eq!((cons[1].memory_start, cons[1].memory_end), (0, 1));
        // Exec view of the getter matches.
        let deps = collect_exec(&app, &handlers, root, gtr, 0, 0);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].vertex, Some((root, a)));
        assert_eq!((deps[0].memory_start, deps[0].memory_end), (2, 3));
    }

    #[test]
    fn hierarchy_promotes_to_parent() {
        let platform = platform();
        let mut b = AppBuilder::new("hier", &platform);
        let g = b.root();
        let a = b.add_actor(g, "A", 0, 1);
        let (sv, sub) = b.add_subgraph(g, "S", 1, 0);
        b.connect_const(g, a, 0, sv, 0, 4, 2).unwrap();
        let inner = b.add_actor(sub, "V", 1, 0);
        let in_if = b.input_interface(sub, 0);
        b.connect_const(sub, in_if, 0, inner, 0, 2, 1).unwrap();
        let app = b.finalize().unwrap();
        let (handlers, root) = resolve(&app);
        // Subgraph firing 1, V firing 1 reads outer byte 3 -> A firing 0.
        let child = handlers.subgraph_firing(&app, root, sv, 1).unwrap();
        let deps = collect_exec(&app, &handlers, child, inner, 1, 0);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].vertex, Some((root, a)));
        assert_eq!((deps[0].firing_start, deps[0].firing_end), (0, 0));
        assert_eq!((deps[0].memory_start, deps[0].memory_end), (3, 3));
        // Consumer view from A covers both subgraph firings.
        let cons: Vec<_> = cons_dependencies(&app, &handlers, root, a, 0, 0)
            .unwrap()
            .map(|d| d.unwrap())
            .collect();
        assert_eq!(cons.len(), 2);
        assert!(cons.iter().all(|d| d.vertex.map(|(f, _)| f) != Some(root)));
        assert_eq!(cons.iter().map(|d| d.firing_count()).sum::<i64>(), 4);
    }

    #[test]
    fn subgraph_output_resolves_inside_child() {
        let platform = platform();
        let mut b = AppBuilder::new("out", &platform);
        let g = b.root();
        let (sv, sub) = b.add_subgraph(g, "S", 0, 1);
        let consumer = b.add_actor(g, "B", 1, 0);
        b.connect_const(g, sv, 0, consumer, 0, 2, 1).unwrap();
        let inner = b.add_actor(sub, "V", 0, 1);
        let out_if = b.output_interface(sub, 0);
        b.connect_const(sub, inner, 0, out_if, 0, 2, 2).unwrap();
        let app = b.finalize().unwrap();
        let (handlers, root) = resolve(&app);
        let child = handlers.subgraph_firing(&app, root, sv, 0).unwrap();
        let deps = collect_exec(&app, &handlers, root, consumer, 1, 0);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].vertex, Some((child, inner)));
        assert_eq!((deps[0].memory_start, deps[0].memory_end), (1, 1));
    }

    #[test]
    fn unresolved_child_yields_unresolved_record() {
        let platform = platform();
        let mut b = AppBuilder::new("dyn", &platform);
        let g = b.root();
        let n = b.add_param(g, crate::core::param::Param::dynamic("n"));
        let cfg = b.add_config(g, "C", 0, 0);
        b.set_output_params(g, cfg, &[n]);
        let (sv, sub) = b.add_subgraph(g, "S", 0, 1);
        let consumer = b.add_actor(g, "B", 1, 0);
        b.connect_const(g, sv, 0, consumer, 0, 2, 2).unwrap();
        let inner_n = b.add_param(sub, crate::core::param::Param::inherited("n", n));
        let inner = b.add_actor(sub, "V", 0, 1);
        let out_if = b.output_interface(sub, 0);
        b.connect(sub, inner, 0, out_if, 0, "1", "2").unwrap();
        let _ = inner_n;
        let app = b.finalize().unwrap();
        let mut handlers = Handlers::new(&app);
        handlers.resolve_all(&app).unwrap();
        let root = handlers.handler(handlers.root()).firings[0];
        // Root carries the dynamic param: nothing resolved yet, so the
        // consumer's dependency through S is unresolved.
        assert!(!handlers.is_resolved(root));
        let deps: Vec<_> = exec_dependencies(&app, &handlers, root, consumer, 0, 0)
            .unwrap()
            .map(|d| d.unwrap())
            .collect();
        assert_eq!(deps.len(), 1);
        assert!(deps[0].is_unresolved());
        assert_eq!(
            exec_dependency_count(&app, &handlers, root, consumer, 0, 0).unwrap(),
            -1
        );
        let _ = (inner, sv);
    }

    #[test]
    fn zero_rate_edge_has_no_dependencies() {
        let platform = platform();
        let mut b = AppBuilder::new("nil", &platform);
        let g = b.root();
        let a = b.add_actor(g, "A", 0, 1);
        let v = b.add_actor(g, "B", 1, 0);
        b.connect_const(g, a, 0, v, 0, 0, 0).unwrap();
        let app = b.finalize().unwrap();
        let (handlers, root) = resolve(&app);
        assert_eq!(collect_exec(&app, &handlers, root, v, 0, 0).len(), 0);
        assert_eq!(
            cons_dependency_count(&app, &handlers, root, a, 0, 0).unwrap(),
            0
        );
    }
}

//! Repetition-vector computation.
//!
//! The balance equations are solved over the rationals per connected
//! component, scaled to the least positive integer solution, then scaled
//! again so that interface and config-actor productions are fully consumed.

use petgraph::unionfind::UnionFind;
use tracing::trace;

use crate::core::error::{PisdfError, Result};
use crate::core::expr::ParamTable;
use crate::core::graph::{Graph, VertexKind};
use crate::core::math::{ceil_div, gcd, lcm};

fn is_interface(kind: VertexKind) -> bool {
    matches!(kind, VertexKind::InputIf { .. } | VertexKind::OutputIf { .. })
}

/// Vertices that take part in the balance equations. Interfaces repeat
/// their tokens and config actors fire exactly once, so neither constrains
/// the solution; they only contribute scale factors afterwards.
fn is_unknown(kind: VertexKind) -> bool {
    !is_interface(kind) && !matches!(kind, VertexKind::Config)
}

fn inconsistent(graph: &Graph, detail: impl Into<String>) -> PisdfError {
    PisdfError::BrvInconsistent {
        graph: graph.name.clone(),
        detail: detail.into(),
    }
}

#[derive(Clone, Copy)]
struct Ratio {
    num: i64,
    den: i64,
}

impl Ratio {
    fn reduced(num: i64, den: i64) -> Self {
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1) as i64;
        Self {
            num: num / g,
            den: den / g,
        }
    }
}

/// Compute the repetition vector of one graph under a parameter scope.
pub fn compute(graph: &Graph, params: &dyn ParamTable) -> Result<Vec<u32>> {
    let n = graph.vertex_count();
    let mut rv = vec![1u32; n];

    let mut rates = Vec::with_capacity(graph.edge_count());
    for edge in &graph.edges {
        let src = edge.src_rate.evaluate(params)?;
        let snk = edge.snk_rate.evaluate(params)?;
        if src < 0 || snk < 0 {
            return Err(inconsistent(
                graph,
                format!("edge {} has a negative rate ({src}/{snk})", edge.ix.0),
            ));
        }
        rates.push((src, snk));
    }

    // Balance edges connect two unknown vertices with non-nil rates.
    let balance_edge = |ix: usize| -> bool {
        let edge = &graph.edges[ix];
        let (src, snk) = rates[ix];
        src > 0
            && snk > 0
            && is_unknown(graph.vertex(edge.source).kind)
            && is_unknown(graph.vertex(edge.sink).kind)
    };

    let mut union_find = UnionFind::<usize>::new(n);
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for ix in 0..graph.edge_count() {
        if balance_edge(ix) {
            let edge = &graph.edges[ix];
            union_find.union(edge.source.0 as usize, edge.sink.0 as usize);
            adjacency[edge.source.0 as usize].push(ix);
            adjacency[edge.sink.0 as usize].push(ix);
        }
    }

    // Rational solve, seeded at 1 for the first vertex of each component.
    let mut fraction: Vec<Option<Ratio>> = vec![None; n];
    let mut queue = Vec::new();
    for seed in 0..n {
        if !is_unknown(graph.vertex(crate::core::graph::VertexId(seed as u32)).kind)
            || fraction[seed].is_some()
        {
            continue;
        }
        fraction[seed] = Some(Ratio { num: 1, den: 1 });
        queue.clear();
        queue.push(seed);
        while let Some(current) = queue.pop() {
            let here = fraction[current].expect("assigned before push");
            for &edge_ix in &adjacency[current] {
                let edge = &graph.edges[edge_ix];
                let (src_rate, snk_rate) = rates[edge_ix];
                let (other, other_ratio) = if edge.source.0 as usize == current {
                    // rv(snk) = rv(src) * srcRate / snkRate
                    (
                        edge.sink.0 as usize,
                        Ratio::reduced(here.num * src_rate, here.den * snk_rate),
                    )
                } else {
                    (
                        edge.source.0 as usize,
                        Ratio::reduced(here.num * snk_rate, here.den * src_rate),
                    )
                };
                match fraction[other] {
                    None => {
                        fraction[other] = Some(other_ratio);
                        queue.push(other);
                    }
                    Some(existing) => {
                        if existing.num * other_ratio.den != other_ratio.num * existing.den {
                            return Err(inconsistent(
                                graph,
                                format!(
                                    "edge [{}->{}] over-constrains the balance equations",
                                    graph.vertex(edge.source).name,
                                    graph.vertex(edge.sink).name
                                ),
                            ));
                        }
                    }
                }
            }
        }
    }

    // Scale each component to the least positive integer solution.
    let mut component_lcm: Vec<u64> = vec![1; n];
    for v in 0..n {
        if let Some(ratio) = fraction[v] {
            let root = union_find.find(v);
            component_lcm[root] = lcm(component_lcm[root], ratio.den.unsigned_abs());
        }
    }
    let mut component_gcd: Vec<u64> = vec![0; n];
    for v in 0..n {
        if let Some(ratio) = fraction[v] {
            let root = union_find.find(v);
            let scaled = ratio.num.unsigned_abs() * (component_lcm[root] / ratio.den.unsigned_abs());
            rv[v] = u32::try_from(scaled)
                .map_err(|_| inconsistent(graph, "repetition value overflow"))?;
            component_gcd[root] = gcd(component_gcd[root], scaled);
        }
    }
    for v in 0..n {
        if fraction[v].is_some() {
            let root = union_find.find(v);
            if component_gcd[root] > 1 {
                rv[v] /= component_gcd[root] as u32;
            }
        }
    }

    // Interface and config productions must be entirely consumed; scale the
    // consuming component up when they are not.
    let mut component_scale: Vec<u64> = vec![1; n];
    for ix in 0..graph.edge_count() {
        let edge = &graph.edges[ix];
        let (src_rate, snk_rate) = rates[ix];
        let src_kind = graph.vertex(edge.source).kind;
        let snk_kind = graph.vertex(edge.sink).kind;
        let feeds_component = (matches!(src_kind, VertexKind::InputIf { .. })
            || matches!(src_kind, VertexKind::Config))
            && is_unknown(snk_kind);
        if feeds_component && snk_rate > 0 {
            let root = union_find.find(edge.sink.0 as usize);
            let total =
                snk_rate as u64 * rv[edge.sink.0 as usize] as u64 * component_scale[root];
            if total > 0 && total < src_rate as u64 {
                component_scale[root] *= ceil_div(src_rate as u64, total);
            }
        }
        let drains_component = matches!(snk_kind, VertexKind::OutputIf { .. })
            && is_unknown(src_kind);
        if drains_component && src_rate > 0 {
            let root = union_find.find(edge.source.0 as usize);
            let total =
                src_rate as u64 * rv[edge.source.0 as usize] as u64 * component_scale[root];
            if total > 0 && total < snk_rate as u64 {
                component_scale[root] *= ceil_div(snk_rate as u64, total);
            }
        }
    }
    for v in 0..n {
        let vertex = graph.vertex(crate::core::graph::VertexId(v as u32));
        if !is_unknown(vertex.kind) {
            rv[v] = 1;
            continue;
        }
        let root = union_find.find(v);
        if component_scale[root] > 1 {
            let scaled = rv[v] as u64 * component_scale[root];
            rv[v] = u32::try_from(scaled)
                .map_err(|_| inconsistent(graph, "repetition value overflow"))?;
        }
    }

    // Configuration actors and the delay machinery fire exactly once.
    for vertex in &graph.vertices {
        if vertex.requires_unit_rv() && rv[vertex.ix.0 as usize] != 1 {
            return Err(inconsistent(
                graph,
                format!(
                    "vertex [{}] must have a repetition value of 1, solved {}",
                    vertex.name,
                    rv[vertex.ix.0 as usize]
                ),
            ));
        }
    }
    trace!(graph = %graph.name, ?rv, "repetition vector resolved");
    Ok(rv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archi::Platform;
    use crate::core::expr::NoParams;
    use crate::core::graph::AppBuilder;
    use crate::core::param::Param;

    fn platform() -> Platform {
        let mut builder = Platform::builder();
        let hw = builder.add_hw_type("x86");
        let cluster = builder.add_cluster("main");
        builder.add_pe("P0", hw, cluster);
        builder.build().unwrap()
    }

    #[test]
    fn chain_balances() {
        let platform = platform();
        let mut b = AppBuilder::new("chain", &platform);
        let g = b.root();
        let a = b.add_actor(g, "A", 0, 1);
        let v = b.add_actor(g, "B", 1, 1);
        let c = b.add_actor(g, "C", 1, 0);
        b.connect_const(g, a, 0, v, 0, 3, 2).unwrap();
        b.connect_const(g, v, 0, c, 0, 1, 3).unwrap();
        let app = b.finalize().unwrap();
        let rv = compute(app.graph(app.root()), &NoParams).unwrap();
        // A: 3 tokens, B consumes 2 -> A=2, B=3; B produces 1, C consumes 3 -> C=1.
        assert_eq!(rv, vec![2, 3, 1]);
    }

    #[test]
    fn inconsistent_cycle_is_rejected() {
        let platform = platform();
        let mut b = AppBuilder::new("cycle", &platform);
        let g = b.root();
        let a = b.add_actor(g, "A", 1, 1);
        let v = b.add_actor(g, "B", 1, 1);
        b.connect_const(g, a, 0, v, 0, 2, 1).unwrap();
        b.connect_const(g, v, 0, a, 0, 1, 3).unwrap();
        let app = b.finalize().unwrap();
        let err = compute(app.graph(app.root()), &NoParams).unwrap_err();
        assert!(matches!(err, PisdfError::BrvInconsistent { .. }));
    }

    #[test]
    fn parameterised_rates() {
        let platform = platform();
        let mut b = AppBuilder::new("params", &platform);
        let g = b.root();
        b.add_param(g, Param::fixed("n", 4));
        let a = b.add_actor(g, "A", 0, 1);
        let v = b.add_actor(g, "B", 1, 0);
        b.connect(g, a, 0, v, 0, "n", "2").unwrap();
        let app = b.finalize().unwrap();
        let graph = app.graph(app.root());
        let scope = crate::core::param::DeclScope(&graph.params);
        let rv = compute(graph, &scope).unwrap();
        assert_eq!(rv, vec![1, 2]);
    }

    #[test]
    fn zero_rate_edges_are_nil() {
        let platform = platform();
        let mut b = AppBuilder::new("nil", &platform);
        let g = b.root();
        let a = b.add_actor(g, "A", 0, 1);
        let v = b.add_actor(g, "B", 1, 0);
        b.connect_const(g, a, 0, v, 0, 0, 0).unwrap();
        let app = b.finalize().unwrap();
        let rv = compute(app.graph(app.root()), &NoParams).unwrap();
        assert_eq!(rv, vec![1, 1]);
    }

    #[test]
    fn disconnected_components_solve_independently() {
        let platform = platform();
        let mut b = AppBuilder::new("two", &platform);
        let g = b.root();
        let a = b.add_actor(g, "A", 0, 1);
        let v = b.add_actor(g, "B", 1, 0);
        let c = b.add_actor(g, "C", 0, 1);
        let d = b.add_actor(g, "D", 1, 0);
        b.connect_const(g, a, 0, v, 0, 2, 1).unwrap();
        b.connect_const(g, c, 0, d, 0, 1, 5).unwrap();
        let app = b.finalize().unwrap();
        let rv = compute(app.graph(app.root()), &NoParams).unwrap();
        assert_eq!(rv, vec![1, 2, 5, 1]);
    }

    #[test]
    fn interface_production_scales_the_component() {
        let platform = platform();
        let mut b = AppBuilder::new("hier", &platform);
        let g = b.root();
        let a = b.add_actor(g, "A", 0, 1);
        let (sub_vertex, sub) = b.add_subgraph(g, "S", 1, 0);
        b.connect_const(g, a, 0, sub_vertex, 0, 8, 8).unwrap();
        let inner = b.add_actor(sub, "V", 1, 0);
        let in_if = b.input_interface(sub, 0);
        // Interface provides 8 tokens, V consumes 2 -> V fires 4 times.
        b.connect_const(sub, in_if, 0, inner, 0, 8, 2).unwrap();
        let app = b.finalize().unwrap();
        let rv = compute(app.graph(sub), &NoParams).unwrap();
        let inner_ix = inner.0 as usize;
        assert_eq!(rv[inner_ix], 4);
    }

    #[test]
    fn delay_vertices_keep_unit_rv() {
        let platform = platform();
        let mut b = AppBuilder::new("delayed", &platform);
        let g = b.root();
        let a = b.add_actor(g, "A", 0, 1);
        let v = b.add_actor(g, "B", 1, 0);
        let e = b.connect_const(g, a, 0, v, 0, 1, 1).unwrap();
        b.add_delay(g, e, "2", true).unwrap();
        let app = b.finalize().unwrap();
        let graph = app.graph(app.root());
        let rv = compute(graph, &NoParams).unwrap();
        for vertex in &graph.vertices {
            if vertex.requires_unit_rv() {
                assert_eq!(rv[vertex.ix.0 as usize], 1, "vertex {}", vertex.name);
            }
        }
    }
}

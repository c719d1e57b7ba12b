use serde::Serialize;
use tracing::trace;

use crate::core::archi::{ClusterId, PeId, Platform};
use crate::core::deps::exec_dependencies;
use crate::core::error::{PisdfError, Result};
use crate::core::firing::{Handlers, UNSET_IX};
use crate::core::graph::App;
use crate::core::scheduling::schedule::Schedule;
use crate::core::scheduling::task::{SyncKind, Task, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MappingPolicy {
    BestFit,
    RoundRobin,
}

/// Assigns one task to a processing element, inserting SEND/RECEIVE pairs
/// when the placement crosses a cluster boundary.
pub trait Mapper {
    /// Lower bound on start times for the whole pass (global minimum PE
    /// end time, refreshed by the caller between tasks).
    fn set_start_time(&mut self, time: u64);

    /// Map the task currently at `task_ix`; returns its index after any
    /// synchronisation insertion.
    fn map(
        &mut self,
        app: &App,
        platform: &Platform,
        handlers: &mut Handlers,
        schedule: &mut Schedule,
        task_ix: u32,
    ) -> Result<u32>;
}

pub fn make_mapper(policy: MappingPolicy) -> Box<dyn Mapper + Send> {
    match policy {
        MappingPolicy::BestFit => Box::new(BestFitMapper::default()),
        MappingPolicy::RoundRobin => Box::new(RoundRobinMapper::default()),
    }
}

#[derive(Debug, Clone, Copy)]
struct PeCandidate {
    pe: PeId,
    start: u64,
    end: u64,
    extern_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
struct ProducerDep {
    task_ix: u32,
    bytes: u64,
}

#[derive(Default)]
struct MapperCore {
    start_time: u64,
}

impl MapperCore {
    /// Producer tasks feeding a vertex task, with the byte volume each one
    /// contributes.
    fn collect_producers(
        &self,
        app: &App,
        handlers: &Handlers,
        schedule: &Schedule,
        task_ix: u32,
    ) -> Result<Vec<ProducerDep>> {
        let TaskKind::Vertex {
            firing,
            vertex,
            vertex_firing,
        } = schedule.task(task_ix).kind
        else {
            return Ok(Vec::new());
        };
        let graph = app.graph(handlers.graph_of(firing));
        let mut producers = Vec::new();
        for port in 0..graph.vertex(vertex).inputs.len() {
            for dep in exec_dependencies(app, handlers, firing, vertex, vertex_firing, port)? {
                let dep = dep?;
                let Some((dep_firing, dep_vertex)) = dep.vertex else {
                    continue;
                };
                if dep.rate <= 0 {
                    continue;
                }
                for j in dep.firing_start..=dep.firing_end {
                    let src_ix = handlers.task_ix(dep_firing, dep_vertex, j);
                    if src_ix == UNSET_IX || src_ix as usize >= schedule.len() {
                        continue;
                    }
                    let src = schedule.task(src_ix);
                    let matches = matches!(
                        src.kind,
                        TaskKind::Vertex { firing, vertex, vertex_firing }
                            if firing == dep_firing && vertex == dep_vertex && vertex_firing == j
                    );
                    if matches && src.mapped_pe.is_some() {
                        producers.push(ProducerDep {
                            task_ix: src_ix,
                            bytes: dep.bytes_for_firing(j) as u64,
                        });
                    }
                }
            }
        }
        Ok(producers)
    }

    #[allow(clippy::too_many_arguments)]
    fn map_with<S>(
        &mut self,
        select: &mut S,
        app: &App,
        platform: &Platform,
        handlers: &mut Handlers,
        schedule: &mut Schedule,
        task_ix: u32,
    ) -> Result<u32>
    where
        S: FnMut(&[PeCandidate]) -> usize,
    {
        let TaskKind::Vertex {
            firing,
            vertex,
            vertex_firing: _,
        } = schedule.task(task_ix).kind
        else {
            return Ok(task_ix);
        };
        let graph = app.graph(handlers.graph_of(firing));
        let vertex_name = graph.vertex(vertex).name.clone();
        let scope = handlers.scope(app, firing);
        let producers = self.collect_producers(app, handlers, schedule, task_ix)?;
        let dep_ready = producers
            .iter()
            .map(|p| schedule.task(p.task_ix).end_time)
            .max()
            .unwrap_or(0);

        let mut candidates = Vec::new();
        let mut no_route: Option<(ClusterId, ClusterId)> = None;
        let mut any_mappable = false;
        for pe in platform.pe_array() {
            if !graph.vertex(vertex).rt.is_pe_mappable(pe) {
                continue;
            }
            any_mappable = true;
            let timing = graph.vertex(vertex).rt.timing_on_pe(pe, &scope)?.max(0) as u64;
            let mut comm_cost: u64 = 0;
            let mut extern_bytes: u64 = 0;
            let mut unreachable = false;
            for p in &producers {
                let src_pe = schedule
                    .task(p.task_ix)
                    .mapped_pe
                    .expect("producers are mapped");
                let cost = platform.data_communication_cost_pe_to_pe(src_pe, pe.ix, p.bytes);
                if cost == u64::MAX {
                    unreachable = true;
                    no_route
                        .get_or_insert((platform.pe(src_pe).cluster, pe.cluster));
                    break;
                }
                comm_cost = comm_cost.saturating_add(cost);
                if platform.pe(src_pe).cluster != pe.cluster {
                    extern_bytes += p.bytes;
                }
            }
            if unreachable {
                continue;
            }
            let ready = schedule.pe_end_time(pe.ix).max(self.start_time);
            let start = ready.max(dep_ready + comm_cost);
            candidates.push(PeCandidate {
                pe: pe.ix,
                start,
                end: start + timing,
                extern_bytes,
            });
        }
        if candidates.is_empty() {
            if let Some((from, to)) = no_route.filter(|_| any_mappable) {
                return Err(PisdfError::NoRoute {
                    from: from.0,
                    to: to.0,
                });
            }
            return Err(PisdfError::UnmappableTask { task: vertex_name });
        }
        let chosen = candidates[select(&candidates)];
        let mapped_cluster = platform.pe(chosen.pe).cluster;
        let lrt_count = platform.lrt_count() as usize;

        // Cross-cluster producers get a SEND on their side and a RECEIVE
        // on ours; the consumer then waits on the RECEIVE instead.
        let mut final_ix = task_ix;
        let mut start = chosen.start;
        let mut effective = producers;
        for p in &mut effective {
            let src_task = schedule.task(p.task_ix);
            let src_pe = src_task.mapped_pe.expect("producers are mapped");
            let src_cluster = platform.pe(src_pe).cluster;
            if src_cluster == mapped_cluster || p.bytes == 0 {
                continue;
            }
            let send_bus = platform
                .cluster_to_cluster_memory_bus(src_cluster, mapped_cluster)
                .copied()
                .ok_or(PisdfError::NoRoute {
                    from: src_cluster.0,
                    to: mapped_cluster.0,
                })?;
            let recv_bus = platform
                .cluster_to_cluster_memory_bus(mapped_cluster, src_cluster)
                .copied()
                .ok_or(PisdfError::NoRoute {
                    from: mapped_cluster.0,
                    to: src_cluster.0,
                })?;
            let producer_end = src_task.end_time;
            let producer_lrt = src_task.mapped_lrt.expect("producers are mapped");
            let producer_job = src_task.job_exec_ix;
            let send_ix = final_ix;
            let recv_ix = final_ix + 1;
            let consumer_ix = final_ix + 2;
            let send = Task::sync(
                TaskKind::Sync {
                    kind: SyncKind::Send,
                    from: src_cluster,
                    to: mapped_cluster,
                    bytes: p.bytes,
                    dep_task_ix: consumer_ix,
                    pred: p.task_ix,
                    succ: recv_ix,
                },
                lrt_count,
            );
            let recv = Task::sync(
                TaskKind::Sync {
                    kind: SyncKind::Receive,
                    from: src_cluster,
                    to: mapped_cluster,
                    bytes: p.bytes,
                    dep_task_ix: consumer_ix,
                    pred: send_ix,
                    succ: consumer_ix,
                },
                lrt_count,
            );
            schedule.insert_tasks(final_ix, vec![send, recv], handlers);

            // Place the SEND on the producer's cluster.
            let (send_pe, send_start) =
                find_pe_in_cluster(platform, schedule, src_cluster, producer_end);
            let send_end = send_start + send_bus.cost(p.bytes);
            let send_lrt = platform.pe(send_pe).lrt;
            schedule.update_task_and_set_ready(send_ix, send_pe, send_lrt, send_start, send_end);
            if producer_lrt != send_lrt {
                schedule
                    .task_mut(send_ix)
                    .add_sync_constraint(producer_lrt, producer_job, p.bytes);
                schedule.task_mut(p.task_ix).notify_flags[send_lrt.0 as usize] = true;
            }

            // Place the RECEIVE on ours, after the SEND completes.
            let (recv_pe, recv_start) =
                find_pe_in_cluster(platform, schedule, mapped_cluster, send_end);
            let recv_end = recv_start + recv_bus.cost(p.bytes);
            let recv_lrt = platform.pe(recv_pe).lrt;
            let send_job = schedule.task(send_ix).job_exec_ix;
            schedule.update_task_and_set_ready(recv_ix, recv_pe, recv_lrt, recv_start, recv_end);
            if send_lrt != recv_lrt {
                schedule
                    .task_mut(recv_ix)
                    .add_sync_constraint(send_lrt, send_job, p.bytes);
                schedule.task_mut(send_ix).notify_flags[recv_lrt.0 as usize] = true;
            }

            start = start.max(recv_end);
            p.task_ix = recv_ix;
            final_ix += 2;
        }

        let timing = chosen.end - chosen.start;
        let lrt = platform.pe(chosen.pe).lrt;
        schedule.update_task_and_set_ready(final_ix, chosen.pe, lrt, start, start + timing);
        trace!(
            task = final_ix,
            vertex = %vertex_name,
            pe = chosen.pe.0,
            start,
            end = start + timing,
            "task mapped"
        );

        // Synchronisation bookkeeping against the effective producers
        // (RECEIVEs stand in for their cross-cluster originals).
        for p in &effective {
            let src = schedule.task(p.task_ix);
            let src_lrt = src.mapped_lrt.expect("producers are mapped");
            let src_job = src.job_exec_ix;
            if src_lrt != lrt {
                schedule
                    .task_mut(final_ix)
                    .add_sync_constraint(src_lrt, src_job, p.bytes);
            }
        }
        // Transitive elision: per producing LRT only the newest producer
        // carries the notification duty.
        for p in &effective {
            let src = schedule.task(p.task_ix);
            let src_lrt = src.mapped_lrt.expect("producers are mapped");
            if src_lrt == lrt {
                continue;
            }
            let constraint =
                schedule.task(final_ix).sync_exec_ix_on_lrt[src_lrt.0 as usize];
            let is_newest = schedule.task(p.task_ix).job_exec_ix == constraint;
            schedule.task_mut(p.task_ix).notify_flags[lrt.0 as usize] = is_newest;
        }
        Ok(final_ix)
    }
}

/// Earliest-available PE of a cluster for a synchronisation task.
fn find_pe_in_cluster(
    platform: &Platform,
    schedule: &Schedule,
    cluster: ClusterId,
    min_start: u64,
) -> (PeId, u64) {
    let mut best: Option<(PeId, u64)> = None;
    for &pe in &platform.cluster(cluster).pes {
        let start = schedule.pe_end_time(pe).max(min_start);
        if best.is_none() || start < best.expect("checked").1 {
            best = Some((pe, start));
        }
    }
    best.expect("clusters are never empty")
}

/// Picks the PE giving the earliest finish, breaking ties toward less
/// cross-cluster traffic, then lower PE index.
#[derive(Default)]
pub struct BestFitMapper {
    core: MapperCore,
}

impl Mapper for BestFitMapper {
    fn set_start_time(&mut self, time: u64) {
        self.core.start_time = time;
    }

    fn map(
        &mut self,
        app: &App,
        platform: &Platform,
        handlers: &mut Handlers,
        schedule: &mut Schedule,
        task_ix: u32,
    ) -> Result<u32> {
        let mut select = |candidates: &[PeCandidate]| {
            let mut best = 0;
            for (ix, c) in candidates.iter().enumerate().skip(1) {
                let b = &candidates[best];
                if (c.end, c.extern_bytes, c.pe.0) < (b.end, b.extern_bytes, b.pe.0) {
                    best = ix;
                }
            }
            best
        };
        self.core
            .map_with(&mut select, app, platform, handlers, schedule, task_ix)
    }
}

/// Cycles through the mappable PEs in index order, ignoring load.
#[derive(Default)]
pub struct RoundRobinMapper {
    core: MapperCore,
    last_pe: Option<u32>,
}

impl Mapper for RoundRobinMapper {
    fn set_start_time(&mut self, time: u64) {
        self.core.start_time = time;
    }

    fn map(
        &mut self,
        app: &App,
        platform: &Platform,
        handlers: &mut Handlers,
        schedule: &mut Schedule,
        task_ix: u32,
    ) -> Result<u32> {
        let last = self.last_pe;
        let mut picked: Option<u32> = None;
        let mut select = |candidates: &[PeCandidate]| {
            let chosen = match last {
                Some(last) => candidates
                    .iter()
                    .position(|c| c.pe.0 > last)
                    .unwrap_or(0),
                None => 0,
            };
            picked = Some(candidates[chosen].pe.0);
            chosen
        };
        let result = self
            .core
            .map_with(&mut select, app, platform, handlers, schedule, task_ix);
        if result.is_ok() {
            if let Some(pe) = picked {
                self.last_pe = Some(pe);
            }
        }
        result
    }
}

use serde::Serialize;
use tracing::{debug, trace};

use crate::core::archi::Platform;
use crate::core::deps::{cons_dependencies, exec_dependencies};
use crate::core::error::Result;
use crate::core::firing::{FiringId, HandlerId, Handlers, UNSET_IX};
use crate::core::graph::{App, VertexId, VertexKind};
use crate::core::scheduling::schedule::Schedule;
use crate::core::scheduling::task::Task;

/// Value far outside any real schedule level; marks tasks that cannot run
/// this pass because something upstream is unresolved.
const NON_SCHEDULABLE_LEVEL: i64 = i64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulingPolicy {
    List,
    Greedy,
}

/// Produces the ordered task list for one scheduling pass.
///
/// State persists between passes of the same iteration: tasks pruned as
/// non-schedulable stay queued and are retried once their upstream
/// resolves.
pub trait Scheduler {
    fn schedule(
        &mut self,
        app: &App,
        platform: &Platform,
        handlers: &mut Handlers,
        schedule: &mut Schedule,
    ) -> Result<()>;

    fn clear(&mut self);
}

pub fn make_scheduler(policy: SchedulingPolicy) -> Box<dyn Scheduler + Send> {
    match policy {
        SchedulingPolicy::List => Box::new(ListScheduler::default()),
        SchedulingPolicy::Greedy => Box::new(GreedyScheduler::default()),
    }
}

#[derive(Debug, Clone, Copy)]
struct ListTask {
    firing: FiringId,
    vertex: VertexId,
    k: u32,
    level: i64,
}

/// Machinery shared by the list and greedy strategies: the pre-order walk
/// over the handler tree, non-schedulable marking and the prune step.
#[derive(Default)]
struct SchedulerCore {
    tasks: Vec<ListTask>,
}

impl SchedulerCore {
    /// Re-register leftover tasks from the previous pass so dependency
    /// lookups find them again.
    fn reset_unscheduled_tasks(&self, handlers: &mut Handlers) {
        for (ix, task) in self.tasks.iter().enumerate() {
            handlers.set_task_ix(task.firing, task.vertex, task.k, ix as u32);
        }
    }

    fn create_task(&mut self, app: &App, handlers: &mut Handlers, firing: FiringId, vertex: VertexId, k: u32) {
        let graph = app.graph(handlers.graph_of(firing));
        if !graph.vertex(vertex).is_executable() {
            return;
        }
        if handlers.task_ix(firing, vertex, k) != UNSET_IX {
            return;
        }
        self.tasks.push(ListTask {
            firing,
            vertex,
            k,
            level: -1,
        });
        handlers.set_task_ix(firing, vertex, k, self.tasks.len() as u32 - 1);
    }

    fn add_vertices(
        &mut self,
        app: &App,
        handlers: &mut Handlers,
        handler: HandlerId,
    ) -> Result<()> {
        let firings = handlers.handler(handler).firings.clone();
        for firing in firings {
            if handlers.is_resolved(firing) {
                let graph_id = handlers.graph_of(firing);
                let vertex_count = app.graph(graph_id).vertex_count();
                for v in 0..vertex_count {
                    let vertex = VertexId(v as u32);
                    if matches!(
                        app.graph(graph_id).vertex(vertex).kind,
                        VertexKind::Delay { .. }
                    ) {
                        continue;
                    }
                    let rv = handlers.rv(app, firing, vertex);
                    if rv == UNSET_IX {
                        continue;
                    }
                    for k in 0..rv {
                        self.create_task(app, handlers, firing, vertex, k);
                    }
                }
                let children: Vec<HandlerId> = handlers
                    .firing(firing)
                    .subgraph_handlers
                    .iter()
                    .copied()
                    .flatten()
                    .collect();
                for child in children {
                    self.add_vertices(app, handlers, child)?;
                }
            } else {
                // Config actors run ahead of resolution; everything that
                // depends on this firing's outputs must wait.
                let graph_id = handlers.graph_of(firing);
                for vertex in 0..app.graph(graph_id).vertex_count() {
                    let vertex = VertexId(vertex as u32);
                    if matches!(app.graph(graph_id).vertex(vertex).kind, VertexKind::Config) {
                        self.create_task(app, handlers, firing, vertex, 0);
                    }
                }
                if let Some(parent_firing) = handlers.parent_firing(firing) {
                    let (_, graph_vertex) = app
                        .graph(graph_id)
                        .parent
                        .expect("non-root firing has a parent");
                    let k = handlers.firing_value(firing);
                    self.set_non_schedulable(app, handlers, parent_firing, graph_vertex, k)?;
                }
            }
        }
        Ok(())
    }

    /// Mark every transitive consumer of `vertex[k]` as non-schedulable.
    fn set_non_schedulable(
        &mut self,
        app: &App,
        handlers: &Handlers,
        firing: FiringId,
        vertex: VertexId,
        k: u32,
    ) -> Result<()> {
        let graph = app.graph(handlers.graph_of(firing));
        let port_count = graph.vertex(vertex).outputs.len();
        for port in 0..port_count {
            for dep in cons_dependencies(app, handlers, firing, vertex, k, port)? {
                let dep = dep?;
                let Some((dep_firing, dep_vertex)) = dep.vertex else {
                    continue;
                };
                if dep.rate <= 0 {
                    continue;
                }
                for j in dep.firing_start..=dep.firing_end {
                    let ix = handlers.task_ix(dep_firing, dep_vertex, j);
                    let Some(task) = self.tasks.get_mut(ix as usize) else {
                        continue;
                    };
                    if task.firing != dep_firing
                        || task.vertex != dep_vertex
                        || task.k != j
                        || task.level == NON_SCHEDULABLE_LEVEL
                    {
                        continue;
                    }
                    task.level = NON_SCHEDULABLE_LEVEL;
                    self.set_non_schedulable(app, handlers, dep_firing, dep_vertex, j)?;
                }
            }
        }
        Ok(())
    }

    /// Emit schedulable tasks in order, keep the rest for the next pass.
    fn emit(&mut self, handlers: &mut Handlers, schedule: &mut Schedule, lrt_count: usize) {
        let non_schedulable = self
            .tasks
            .iter()
            .rev()
            .take_while(|t| t.level == NON_SCHEDULABLE_LEVEL)
            .count();
        let last_schedulable = self.tasks.len() - non_schedulable;
        for task in &self.tasks[..last_schedulable] {
            let ix = schedule.add_task(Task::vertex(task.firing, task.vertex, task.k, lrt_count));
            handlers.set_task_ix(task.firing, task.vertex, task.k, ix);
        }
        let leftover = self.tasks.split_off(last_schedulable);
        debug!(
            emitted = last_schedulable,
            leftover = leftover.len(),
            "scheduling pass done"
        );
        self.tasks = leftover;
        for task in &mut self.tasks {
            task.level = -1;
        }
        // Leftover registers are reset so a later pass can retry them.
        for task in &self.tasks {
            handlers.set_task_ix(task.firing, task.vertex, task.k, UNSET_IX);
        }
    }
}

/// List scheduler: tasks ordered by schedule level (critical path first
/// inside each level class).
#[derive(Default)]
pub struct ListScheduler {
    core: SchedulerCore,
}

impl ListScheduler {
    fn compute_level(
        &mut self,
        app: &App,
        platform: &Platform,
        handlers: &Handlers,
        ix: usize,
    ) -> Result<i64> {
        let task = self.core.tasks[ix];
        if task.level >= 0 || task.level == NON_SCHEDULABLE_LEVEL {
            return Ok(task.level);
        }
        let graph = app.graph(handlers.graph_of(task.firing));
        let port_count = graph.vertex(task.vertex).inputs.len();
        // Mark in-progress so delay-free cycles cannot recurse forever.
        self.core.tasks[ix].level = 0;
        let mut level: i64 = 0;
        for port in 0..port_count {
            let deps: Vec<_> = exec_dependencies(app, handlers, task.firing, task.vertex, task.k, port)?
                .collect::<Result<_>>()?;
            for dep in deps {
                let Some((dep_firing, dep_vertex)) = dep.vertex else {
                    // Producer unknown: this task cannot run this pass.
                    self.core.tasks[ix].level = NON_SCHEDULABLE_LEVEL;
                    self.core
                        .set_non_schedulable(app, handlers, task.firing, task.vertex, task.k)?;
                    return Ok(NON_SCHEDULABLE_LEVEL);
                };
                if dep.rate <= 0 {
                    continue;
                }
                let source_graph = app.graph(handlers.graph_of(dep_firing));
                let scope = handlers.scope(app, dep_firing);
                let min_exec = source_graph
                    .vertex(dep_vertex)
                    .rt
                    .min_execution_time(platform, &scope)?;
                for j in dep.firing_start..=dep.firing_end {
                    let source_ix = handlers.task_ix(dep_firing, dep_vertex, j);
                    let Some(source) = self.core.tasks.get(source_ix as usize).copied() else {
                        continue;
                    };
                    if source.firing != dep_firing || source.vertex != dep_vertex || source.k != j
                    {
                        continue;
                    }
                    let source_level =
                        self.compute_level(app, platform, handlers, source_ix as usize)?;
                    if source_level != NON_SCHEDULABLE_LEVEL {
                        level = level.max(source_level + min_exec);
                    }
                }
            }
        }
        // Another path may have marked this task while we recursed.
        if self.core.tasks[ix].level != NON_SCHEDULABLE_LEVEL {
            self.core.tasks[ix].level = level;
        }
        Ok(self.core.tasks[ix].level)
    }
}

impl Scheduler for ListScheduler {
    fn schedule(
        &mut self,
        app: &App,
        platform: &Platform,
        handlers: &mut Handlers,
        schedule: &mut Schedule,
    ) -> Result<()> {
        self.core.reset_unscheduled_tasks(handlers);
        self.core.add_vertices(app, handlers, handlers.root())?;
        for ix in 0..self.core.tasks.len() {
            self.compute_level(app, platform, handlers, ix)?;
        }
        // Producers carry lower levels than their consumers; ties are
        // broken by firing index, then INIT ahead of END.
        let tasks = &mut self.core.tasks;
        let mut order: Vec<usize> = (0..tasks.len()).collect();
        order.sort_by(|&a, &b| {
            let (ta, tb) = (&tasks[a], &tasks[b]);
            ta.level.cmp(&tb.level).then_with(|| {
                if ta.vertex == tb.vertex && handlers.graph_of(ta.firing) == handlers.graph_of(tb.firing) {
                    (ta.firing.0, ta.k).cmp(&(tb.firing.0, tb.k))
                } else {
                    let graph_a = app.graph(handlers.graph_of(ta.firing));
                    let graph_b = app.graph(handlers.graph_of(tb.firing));
                    let a_init = matches!(graph_a.vertex(ta.vertex).kind, VertexKind::Init { .. });
                    let b_end = matches!(graph_b.vertex(tb.vertex).kind, VertexKind::End { .. });
                    let b_init = matches!(graph_b.vertex(tb.vertex).kind, VertexKind::Init { .. });
                    let a_end = matches!(graph_a.vertex(ta.vertex).kind, VertexKind::End { .. });
                    if a_init && b_end {
                        std::cmp::Ordering::Less
                    } else if b_init && a_end {
                        std::cmp::Ordering::Greater
                    } else {
                        std::cmp::Ordering::Equal
                    }
                }
            })
        });
        let reordered: Vec<ListTask> = order.iter().map(|&ix| tasks[ix]).collect();
        self.core.tasks = reordered;
        trace!(tasks = self.core.tasks.len(), "levels computed");
        self.core
            .emit(handlers, schedule, platform.lrt_count() as usize);
        Ok(())
    }

    fn clear(&mut self) {
        self.core.tasks.clear();
    }
}

/// Greedy scheduler: plain pre-order over the handler tree; the DFS walk
/// already lists every dependency of a firing ahead of it.
#[derive(Default)]
pub struct GreedyScheduler {
    core: SchedulerCore,
}

impl Scheduler for GreedyScheduler {
    fn schedule(
        &mut self,
        app: &App,
        platform: &Platform,
        handlers: &mut Handlers,
        schedule: &mut Schedule,
    ) -> Result<()> {
        self.core.reset_unscheduled_tasks(handlers);
        self.core.add_vertices(app, handlers, handlers.root())?;
        for ix in 0..self.core.tasks.len() {
            let task = self.core.tasks[ix];
            if task.level == NON_SCHEDULABLE_LEVEL {
                continue;
            }
            // A producer hidden behind an unresolved child handler keeps
            // the consumer out of this pass.
            let graph = app.graph(handlers.graph_of(task.firing));
            let port_count = graph.vertex(task.vertex).inputs.len();
            let mut unresolved = false;
            for port in 0..port_count {
                for dep in
                    exec_dependencies(app, handlers, task.firing, task.vertex, task.k, port)?
                {
                    if dep?.is_unresolved() {
                        unresolved = true;
                        break;
                    }
                }
                if unresolved {
                    break;
                }
            }
            if unresolved {
                self.core.tasks[ix].level = NON_SCHEDULABLE_LEVEL;
                self.core
                    .set_non_schedulable(app, handlers, task.firing, task.vertex, task.k)?;
            } else {
                self.core.tasks[ix].level = 0;
            }
        }
        // Stable partition keeps creation order within each class.
        self.core
            .tasks
            .sort_by_key(|t| t.level == NON_SCHEDULABLE_LEVEL);
        self.core
            .emit(handlers, schedule, platform.lrt_count() as usize);
        Ok(())
    }

    fn clear(&mut self) {
        self.core.tasks.clear();
    }
}

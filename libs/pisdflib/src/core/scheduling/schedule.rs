use serde::Serialize;

use crate::core::archi::{LrtId, PeId, Platform};
use crate::core::firing::{Handlers, UNSET_IX};
use crate::core::graph::App;
use crate::core::scheduling::task::{Task, TaskKind, TaskState};

/// Per-PE timeline bookkeeping.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PeSlot {
    pub start_time: u64,
    pub end_time: u64,
    pub load_time: u64,
    pub task_count: u32,
    pub ready_job_count: u32,
}

/// Aggregated statistics of one schedule, serialisable for inspection.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleStats {
    pub makespan: u64,
    pub min_start_time: u64,
    pub per_pe: Vec<PeStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeStats {
    pub pe: u32,
    pub end_time: u64,
    pub load_time: u64,
    pub idle_time: u64,
    pub task_count: u32,
}

/// One (task, placement, time window) record of the Gantt export.
#[derive(Debug, Clone, Serialize)]
pub struct GanttRecord {
    pub task_ix: u32,
    pub label: String,
    pub pe: u32,
    pub start: u64,
    pub end: u64,
}

/// Ordered task list plus per-PE timelines.
pub struct Schedule {
    tasks: Vec<Task>,
    per_pe: Vec<PeSlot>,
    lrt_job_counts: Vec<u32>,
}

impl Schedule {
    pub fn new(platform: &Platform) -> Self {
        Self {
            tasks: Vec::new(),
            per_pe: vec![PeSlot::default(); platform.pe_count()],
            lrt_job_counts: vec![0; platform.lrt_count() as usize],
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, ix: u32) -> &Task {
        &self.tasks[ix as usize]
    }

    pub fn task_mut(&mut self, ix: u32) -> &mut Task {
        &mut self.tasks[ix as usize]
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn add_task(&mut self, mut task: Task) -> u32 {
        let ix = self.tasks.len() as u32;
        task.ix = ix;
        self.tasks.push(task);
        ix
    }

    pub fn pe_end_time(&self, pe: PeId) -> u64 {
        self.per_pe[pe.0 as usize].end_time
    }

    /// Lower bound for the next mapping decision.
    pub fn min_pe_end_time(&self) -> u64 {
        self.per_pe
            .iter()
            .map(|slot| slot.end_time)
            .min()
            .unwrap_or(0)
    }

    /// Place a task on a PE and advance that PE's timeline.
    pub fn update_task_and_set_ready(
        &mut self,
        ix: u32,
        pe: PeId,
        lrt: LrtId,
        start_time: u64,
        end_time: u64,
    ) {
        let job_exec_ix = self.lrt_job_counts[lrt.0 as usize];
        self.lrt_job_counts[lrt.0 as usize] += 1;
        let task = &mut self.tasks[ix as usize];
        task.mapped_pe = Some(pe);
        task.mapped_lrt = Some(lrt);
        task.start_time = start_time;
        task.end_time = end_time;
        task.job_exec_ix = job_exec_ix;
        task.state = TaskState::Ready;
        let slot = &mut self.per_pe[pe.0 as usize];
        if slot.task_count == 0 || start_time < slot.start_time {
            slot.start_time = start_time;
        }
        slot.end_time = slot.end_time.max(end_time);
        slot.load_time += end_time - start_time;
        slot.task_count += 1;
        slot.ready_job_count += 1;
    }

    /// Splice synchronisation tasks in before `before_ix`, shifting every
    /// following task and re-registering moved vertex firings.
    pub fn insert_tasks(&mut self, before_ix: u32, tasks: Vec<Task>, handlers: &mut Handlers) {
        if tasks.is_empty() {
            return;
        }
        let shift = tasks.len() as u32;
        let at = before_ix as usize;
        // References held by existing sync tasks move with the shifted
        // region; the inserted tasks carry final indices already.
        for task in &mut self.tasks {
            if let TaskKind::Sync {
                ref mut dep_task_ix,
                ref mut pred,
                ref mut succ,
                ..
            } = task.kind
            {
                for slot in [dep_task_ix, pred, succ] {
                    if *slot != UNSET_IX && *slot >= before_ix {
                        *slot += shift;
                    }
                }
            }
        }
        self.tasks.splice(at..at, tasks);
        // Renumber from the splice point and re-register moved firings.
        for ix in at..self.tasks.len() {
            let new_ix = ix as u32;
            self.tasks[ix].ix = new_ix;
            if let TaskKind::Vertex {
                firing,
                vertex,
                vertex_firing,
            } = self.tasks[ix].kind
            {
                handlers.set_task_ix(firing, vertex, vertex_firing, new_ix);
            }
        }
    }

    pub fn stats(&self) -> ScheduleStats {
        let mut makespan = 0;
        let mut min_start = u64::MAX;
        let mut per_pe = Vec::with_capacity(self.per_pe.len());
        for (pe, slot) in self.per_pe.iter().enumerate() {
            makespan = makespan.max(slot.end_time);
            if slot.task_count > 0 {
                min_start = min_start.min(slot.start_time);
            }
            per_pe.push(PeStats {
                pe: pe as u32,
                end_time: slot.end_time,
                load_time: slot.load_time,
                idle_time: slot.end_time.saturating_sub(slot.load_time),
                task_count: slot.task_count,
            });
        }
        ScheduleStats {
            makespan,
            min_start_time: if min_start == u64::MAX { 0 } else { min_start },
            per_pe,
        }
    }

    /// Gantt record stream for offline rendering.
    pub fn gantt(&self, app: &App, handlers: &Handlers) -> Vec<GanttRecord> {
        self.tasks
            .iter()
            .filter(|t| t.mapped_pe.is_some())
            .map(|t| {
                let label = match t.kind {
                    TaskKind::Vertex {
                        firing,
                        vertex,
                        vertex_firing,
                    } => {
                        let graph = app.graph(handlers.graph_of(firing));
                        format!("{}#{}", graph.vertex(vertex).name, vertex_firing)
                    }
                    TaskKind::Sync { kind, .. } => format!("{kind:?}").to_lowercase(),
                };
                GanttRecord {
                    task_ix: t.ix,
                    label,
                    pe: t.mapped_pe.expect("filtered above").0,
                    start: t.start_time,
                    end: t.end_time,
                }
            })
            .collect()
    }

    pub fn gantt_json(&self, app: &App, handlers: &Handlers) -> serde_json::Value {
        serde_json::json!({
            "stats": self.stats(),
            "tasks": self.gantt(app, handlers),
        })
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.per_pe.fill(PeSlot::default());
        self.lrt_job_counts.fill(0);
    }
}

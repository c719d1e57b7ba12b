use pisdflib_ipc_types::Fifo;
use serde::Serialize;

use crate::core::archi::{ClusterId, LrtId, PeId};
use crate::core::firing::{FiringId, UNSET_IX};
use crate::core::graph::VertexId;

/// Lifecycle of a task inside one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    /// Depends on an unresolved firing; retried next pass.
    NotSchedulable,
    NotRunnable,
    Pending,
    Ready,
    Running,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncKind {
    Send,
    Receive,
}

/// What a task stands for: one vertex firing, or one half of a
/// cross-cluster synchronisation pair.
#[derive(Debug, Clone, Copy)]
pub enum TaskKind {
    Vertex {
        firing: FiringId,
        vertex: VertexId,
        vertex_firing: u32,
    },
    Sync {
        kind: SyncKind,
        from: ClusterId,
        to: ClusterId,
        bytes: u64,
        /// Schedule index of the consumer this pair unblocks.
        dep_task_ix: u32,
        /// Schedule index of the task this half waits for.
        pred: u32,
        /// Schedule index of the task waiting on this half.
        succ: u32,
    },
}

/// One schedulable unit: a vertex firing or a SEND/RECEIVE half.
#[derive(Debug, Clone)]
pub struct Task {
    pub ix: u32,
    pub kind: TaskKind,
    pub state: TaskState,
    pub mapped_pe: Option<PeId>,
    pub mapped_lrt: Option<LrtId>,
    pub start_time: u64,
    pub end_time: u64,
    /// Position in the mapped LRT's job stream; assigned at mapping time.
    pub job_exec_ix: u32,
    /// Per LRT: minimum jobExecIx that must have completed there before
    /// this task may start. [`UNSET_IX`] means no constraint.
    pub sync_exec_ix_on_lrt: Vec<u32>,
    /// Per LRT: bytes backing the tightest constraint (diagnostics and
    /// communication sizing).
    pub sync_rate_on_lrt: Vec<u64>,
    /// Per LRT: whether this task's completion must be published there.
    pub notify_flags: Vec<bool>,
    pub input_fifos: Vec<Fifo>,
    pub output_fifos: Vec<Fifo>,
    /// A job message was emitted for this task.
    pub dispatched: bool,
}

impl Task {
    pub fn vertex(firing: FiringId, vertex: VertexId, vertex_firing: u32, lrt_count: usize) -> Self {
        Self::new(
            TaskKind::Vertex {
                firing,
                vertex,
                vertex_firing,
            },
            lrt_count,
        )
    }

    pub fn sync(kind: TaskKind, lrt_count: usize) -> Self {
        debug_assert!(matches!(kind, TaskKind::Sync { .. }));
        Self::new(kind, lrt_count)
    }

    fn new(kind: TaskKind, lrt_count: usize) -> Self {
        Self {
            ix: UNSET_IX,
            kind,
            state: TaskState::Pending,
            mapped_pe: None,
            mapped_lrt: None,
            start_time: 0,
            end_time: 0,
            job_exec_ix: UNSET_IX,
            sync_exec_ix_on_lrt: vec![UNSET_IX; lrt_count],
            sync_rate_on_lrt: vec![0; lrt_count],
            notify_flags: vec![false; lrt_count],
            input_fifos: Vec::new(),
            output_fifos: Vec::new(),
            dispatched: false,
        }
    }

    pub fn is_sync(&self) -> bool {
        matches!(self.kind, TaskKind::Sync { .. })
    }

    /// Record that this task must wait for `producer_job` on `lrt`.
    pub fn add_sync_constraint(&mut self, lrt: LrtId, producer_job: u32, bytes: u64) {
        let slot = &mut self.sync_exec_ix_on_lrt[lrt.0 as usize];
        if *slot == UNSET_IX || producer_job > *slot {
            *slot = producer_job;
        }
        self.sync_rate_on_lrt[lrt.0 as usize] =
            self.sync_rate_on_lrt[lrt.0 as usize].max(bytes);
    }
}

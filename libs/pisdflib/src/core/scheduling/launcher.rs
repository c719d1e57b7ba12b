use pisdflib_ipc_types::{kernel_ix, ExecConstraint, JobMessage};
use serde::Serialize;
use tracing::trace;

use crate::core::archi::LrtId;
use crate::core::error::{PisdfError, Result};
use crate::core::firing::{FiringId, Handlers, UNSET_IX};
use crate::core::graph::{App, VertexId, VertexKind};
use crate::core::scheduling::fifo_alloc::CountUpdate;
use crate::core::scheduling::schedule::Schedule;
use crate::core::scheduling::task::{TaskKind, TaskState};

/// When jobs leave the driver relative to mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionPolicy {
    /// Map, allocate and dispatch one task at a time.
    Jit,
    /// Map everything first, then dispatch in schedule order.
    Delayed,
}

/// Where finished job messages go. The thread runtime implements this on
/// top of its queues; tests can collect messages directly.
pub trait JobSink {
    fn dispatch(&mut self, lrt: LrtId, message: JobMessage);

    /// Forward a reference-count fix-up for an already-dispatched buffer.
    fn update_count(&mut self, update: CountUpdate);

    /// Ask every worker to republish its job stamp (delayed-broadcast
    /// constraints resolved late in the iteration).
    fn broadcast_job_stamps(&mut self) {}
}

/// Builds job messages from mapped, allocated tasks and hands them to a
/// [`JobSink`].
pub struct TaskLauncher;

impl TaskLauncher {
    /// Emit the message for one task and mark it running.
    pub fn launch(
        app: &App,
        handlers: &Handlers,
        schedule: &mut Schedule,
        task_ix: u32,
        sink: &mut dyn JobSink,
    ) -> Result<()> {
        let message = Self::build_message(app, handlers, schedule, task_ix)?;
        let task = schedule.task_mut(task_ix);
        let lrt = task.mapped_lrt.ok_or_else(|| {
            PisdfError::InvalidGraph("launching an unmapped task".into())
        })?;
        task.state = TaskState::Running;
        task.dispatched = true;
        trace!(task = task_ix, lrt = lrt.0, job = task.job_exec_ix, "job dispatched");
        sink.dispatch(lrt, message);
        Ok(())
    }

    pub fn build_message(
        app: &App,
        handlers: &Handlers,
        schedule: &Schedule,
        task_ix: u32,
    ) -> Result<JobMessage> {
        let task = schedule.task(task_ix);
        let exec_constraints = task
            .sync_exec_ix_on_lrt
            .iter()
            .enumerate()
            .filter(|&(_, &job)| job != UNSET_IX)
            .map(|(lrt, &job)| ExecConstraint {
                lrt_ix: lrt as u16,
                job_exec_ix: job,
            })
            .collect();
        let mut message = JobMessage {
            task_ix,
            job_exec_ix: task.job_exec_ix,
            input_fifos: task.input_fifos.clone(),
            output_fifos: task.output_fifos.clone(),
            exec_constraints,
            notify_flags: task.notify_flags.clone(),
            ..JobMessage::default()
        };
        match task.kind {
            TaskKind::Sync { kind, bytes, .. } => {
                message.kernel_ix = match kind {
                    crate::core::scheduling::task::SyncKind::Send => kernel_ix::SEND,
                    crate::core::scheduling::task::SyncKind::Receive => kernel_ix::RECEIVE,
                };
                message.input_params = vec![bytes as i64];
            }
            TaskKind::Vertex {
                firing,
                vertex,
                vertex_firing,
            } => {
                let (kernel, params, output_param_count) =
                    Self::vertex_payload(app, handlers, firing, vertex, vertex_firing)?;
                message.kernel_ix = kernel;
                message.input_params = params;
                message.output_param_count = output_param_count;
            }
        }
        Ok(message)
    }

    /// Kernel index and positional parameter list per vertex kind.
    fn vertex_payload(
        app: &App,
        handlers: &Handlers,
        firing: FiringId,
        vertex: VertexId,
        _vertex_firing: u32,
    ) -> Result<(u32, Vec<i64>, u16)> {
        let graph = app.graph(handlers.graph_of(firing));
        let v = graph.vertex(vertex);
        let in_rate = |port: usize| -> Result<i64> {
            let edge = v.input_edge(port).expect("ports are connected");
            handlers.snk_rate(app, firing, edge)
        };
        let out_rate = |port: usize| -> Result<i64> {
            let edge = v.output_edge(port).expect("ports are connected");
            handlers.src_rate(app, firing, edge)
        };
        Ok(match v.kind {
            VertexKind::Normal | VertexKind::Config => {
                let kernel = v.rt.kernel_ix().ok_or_else(|| {
                    PisdfError::InvalidGraph(format!("vertex [{}] has no kernel", v.name))
                })?;
                let params = v
                    .input_params
                    .iter()
                    .map(|&ix| handlers.param_value(firing, ix))
                    .collect();
                (kernel, params, v.output_params.len() as u16)
            }
            VertexKind::Fork => {
                let mut params = vec![in_rate(0)?, v.outputs.len() as i64];
                for port in 0..v.outputs.len() {
                    params.push(out_rate(port)?);
                }
                (kernel_ix::FORK, params, 0)
            }
            VertexKind::Join => {
                let mut params = vec![out_rate(0)?, v.inputs.len() as i64];
                for port in 0..v.inputs.len() {
                    params.push(in_rate(port)?);
                }
                (kernel_ix::JOIN, params, 0)
            }
            VertexKind::Repeat => {
                (kernel_ix::REPEAT, vec![in_rate(0)?, out_rate(0)?], 0)
            }
            VertexKind::Duplicate => (
                kernel_ix::DUPLICATE,
                vec![v.outputs.len() as i64, in_rate(0)?],
                0,
            ),
            VertexKind::Head => {
                // First `input_end` inputs cover the output, the last one
                // possibly truncated.
                let goal = out_rate(0)?;
                let mut params = vec![0];
                let mut remaining = goal;
                let mut input_end = 0i64;
                for port in 0..v.inputs.len() {
                    if remaining <= 0 {
                        break;
                    }
                    let consumed = in_rate(port)?.min(remaining);
                    params.push(consumed);
                    remaining -= consumed;
                    input_end += 1;
                }
                params[0] = input_end;
                (kernel_ix::HEAD, params, 0)
            }
            VertexKind::Tail => {
                // Skip everything but the last `goal` bytes.
                let goal = out_rate(0)?;
                let rates: Vec<i64> = (0..v.inputs.len())
                    .map(in_rate)
                    .collect::<Result<_>>()?;
                let total: i64 = rates.iter().sum();
                let mut skip = (total - goal).max(0);
                let mut first_input = 0usize;
                while first_input < rates.len() && skip >= rates[first_input] {
                    skip -= rates[first_input];
                    first_input += 1;
                }
                let first_offset = skip;
                let first_size = rates.get(first_input).copied().unwrap_or(0) - first_offset;
                let mut params = vec![
                    rates.len() as i64,
                    first_input as i64,
                    first_offset,
                    first_size,
                ];
                for &rate in rates.iter().skip(first_input + 1) {
                    params.push(rate);
                }
                (kernel_ix::TAIL, params, 0)
            }
            VertexKind::Init { edge } => {
                let delay = graph.edge(edge).delay.as_ref().expect("init pairs a delay");
                let size = handlers.delay_value(app, firing, edge)?;
                let mut params = vec![i64::from(delay.persistent), size];
                if let Some(address) = delay.persistent_address {
                    params.push(address as i64);
                }
                (kernel_ix::INIT, params, 0)
            }
            VertexKind::End { edge } => {
                let delay = graph.edge(edge).delay.as_ref().expect("end pairs a delay");
                let size = handlers.delay_value(app, firing, edge)?;
                let mut params = vec![i64::from(delay.persistent), size];
                if let Some(address) = delay.persistent_address {
                    params.push(address as i64);
                }
                (kernel_ix::END, params, 0)
            }
            VertexKind::ExternIn { .. } => (kernel_ix::EXTERN_IN, Vec::new(), 0),
            VertexKind::ExternOut { buffer } => (
                kernel_ix::EXTERN_OUT,
                vec![i64::from(buffer), in_rate(0)?],
                0,
            ),
            VertexKind::Graph { .. }
            | VertexKind::InputIf { .. }
            | VertexKind::OutputIf { .. }
            | VertexKind::Delay { .. } => {
                return Err(PisdfError::InvalidGraph(format!(
                    "vertex [{}] is not executable",
                    v.name
                )));
            }
        })
    }
}

use crate::fifo::Fifo;

/// Synchronisation constraint attached to a job: the job must not start
/// before LRT `lrt_ix` has completed its job with execution index
/// `job_exec_ix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecConstraint {
    pub lrt_ix: u16,
    pub job_exec_ix: u32,
}

/// A fully resolved unit of work dispatched to one LRT.
///
/// The message is self contained: the worker resolves FIFO addresses
/// through its memory interface and never touches driver state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobMessage {
    pub kernel_ix: u32,
    pub task_ix: u32,
    pub job_exec_ix: u32,
    pub input_fifos: Vec<Fifo>,
    pub output_fifos: Vec<Fifo>,
    pub input_params: Vec<i64>,
    /// Number of parameter values the kernel is expected to produce; a
    /// non-zero value makes the worker send a [`ParameterMessage`] back.
    pub output_param_count: u16,
    pub exec_constraints: Vec<ExecConstraint>,
    /// One flag per LRT: whether completion of this job must be broadcast
    /// to that LRT's job-stamp table.
    pub notify_flags: Vec<bool>,
}

/// Late job-stamp fix-up for a job that was dispatched before its final
/// execution index was known (delayed-broadcast constraint).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobStampMessage {
    pub task_ix: u32,
    pub job_exec_ix: u32,
}

/// Parameter values produced by a config actor, keyed by the task that ran it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterMessage {
    pub task_ix: u32,
    pub params: Vec<i64>,
}

/// Worker-to-driver notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A config job produced parameters; the values follow in a
    /// [`ParameterMessage`] on the parameter channel.
    JobSentParam { sender: u16, task_ix: u32 },
    /// Consumers were attached to (or retired from) an already-dispatched
    /// buffer. Additive and idempotent per (address, delta) pair.
    MemUpdateCount { sender: u16, address: u64, delta: i32 },
    /// The worker drained every job of the current iteration.
    LrtEndIteration { sender: u16 },
    /// A kernel failed; fatal for the current iteration.
    LrtError { sender: u16, message: String },
}

impl Notification {
    pub fn sender(&self) -> u16 {
        match *self {
            Notification::JobSentParam { sender, .. }
            | Notification::MemUpdateCount { sender, .. }
            | Notification::LrtEndIteration { sender }
            | Notification::LrtError { sender, .. } => sender,
        }
    }
}

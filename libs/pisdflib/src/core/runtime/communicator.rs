use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use pisdflib_ipc_types::{JobMessage, Notification, ParameterMessage};
use tracing::warn;

use crate::core::archi::LrtId;
use crate::core::scheduling::{CountUpdate, JobSink};

/// Everything a worker can find in its queue.
pub enum LrtInput {
    Job(Box<JobMessage>),
    /// Reference-count fix-up for an already-dispatched buffer.
    CountUpdate { address: u64, delta: i32 },
    /// Republish the local job stamp (wakes cross-worker waiters).
    BroadcastStamps,
    /// Drain marker: reply with `LrtEndIteration` once reached.
    EndIteration,
    /// Reset per-iteration state.
    Clear,
    Shutdown,
}

/// Per-LRT progress table: how many jobs each worker has completed.
///
/// Workers publish after every job; a waiter blocks until the producer's
/// stamp passes its constraint (ordering guarantee O2).
pub struct JobStamps {
    completed: Mutex<Vec<u32>>,
    cond: Condvar,
}

impl JobStamps {
    pub fn new(lrt_count: usize) -> Self {
        Self {
            completed: Mutex::new(vec![0; lrt_count]),
            cond: Condvar::new(),
        }
    }

    /// Record completion of `job_exec_ix` on `lrt`.
    pub fn complete(&self, lrt: LrtId, job_exec_ix: u32) {
        let mut completed = self.completed.lock();
        let slot = &mut completed[lrt.0 as usize];
        *slot = (*slot).max(job_exec_ix + 1);
        drop(completed);
        self.cond.notify_all();
    }

    /// Block until every `(lrt, job_exec_ix)` constraint is satisfied.
    pub fn wait_for(&self, constraints: &[(u16, u32)], timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut completed = self.completed.lock();
        loop {
            let satisfied = constraints
                .iter()
                .all(|&(lrt, job)| completed[lrt as usize] > job);
            if satisfied {
                return true;
            }
            if self
                .cond
                .wait_until(&mut completed, deadline)
                .timed_out()
            {
                return false;
            }
        }
    }

    pub fn poke(&self) {
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        self.completed.lock().fill(0);
        self.cond.notify_all();
    }
}

/// Driver-side endpoint of every queue: per-worker job channels, the
/// worker->driver notification channel and the parameter channel.
pub struct Communicator {
    job_txs: Vec<Sender<LrtInput>>,
    notification_rx: Receiver<Notification>,
    notification_tx: Sender<Notification>,
    parameter_rx: Receiver<ParameterMessage>,
    parameter_tx: Sender<ParameterMessage>,
    stamps: Arc<JobStamps>,
}

/// Worker-side handles cloned out of the communicator.
pub struct LrtEndpoint {
    pub lrt: LrtId,
    pub inputs: Receiver<LrtInput>,
    pub notifications: Sender<Notification>,
    pub parameters: Sender<ParameterMessage>,
    pub stamps: Arc<JobStamps>,
}

impl Communicator {
    /// Build the channel mesh; returns the driver endpoint plus one
    /// endpoint per worker.
    pub fn new(lrt_count: usize) -> (Self, Vec<LrtEndpoint>) {
        let (notification_tx, notification_rx) = unbounded();
        let (parameter_tx, parameter_rx) = unbounded();
        let stamps = Arc::new(JobStamps::new(lrt_count));
        let mut job_txs = Vec::with_capacity(lrt_count);
        let mut endpoints = Vec::with_capacity(lrt_count);
        for lrt in 0..lrt_count {
            let (tx, rx) = unbounded();
            job_txs.push(tx);
            endpoints.push(LrtEndpoint {
                lrt: LrtId(lrt as u16),
                inputs: rx,
                notifications: notification_tx.clone(),
                parameters: parameter_tx.clone(),
                stamps: Arc::clone(&stamps),
            });
        }
        (
            Self {
                job_txs,
                notification_rx,
                notification_tx,
                parameter_rx,
                parameter_tx,
                stamps,
            },
            endpoints,
        )
    }

    pub fn stamps(&self) -> &Arc<JobStamps> {
        &self.stamps
    }

    fn send(&self, lrt: LrtId, input: LrtInput) {
        if self.job_txs[lrt.0 as usize].send(input).is_err() {
            warn!(lrt = lrt.0, "worker queue closed");
        }
    }

    pub fn send_to_all(&self, make: impl Fn() -> LrtInput) {
        for lrt in 0..self.job_txs.len() {
            self.send(LrtId(lrt as u16), make());
        }
    }

    pub fn recv_notification(&self, timeout: Duration) -> Option<Notification> {
        self.notification_rx.recv_timeout(timeout).ok()
    }

    pub fn recv_parameters(&self, timeout: Duration) -> Option<ParameterMessage> {
        self.parameter_rx.recv_timeout(timeout).ok()
    }

    /// Driver-local senders (used when the driver itself reports).
    pub fn local_notification_sender(&self) -> Sender<Notification> {
        self.notification_tx.clone()
    }

    pub fn local_parameter_sender(&self) -> Sender<ParameterMessage> {
        self.parameter_tx.clone()
    }
}

impl JobSink for Communicator {
    fn dispatch(&mut self, lrt: LrtId, message: JobMessage) {
        self.send(lrt, LrtInput::Job(Box::new(message)));
    }

    fn update_count(&mut self, update: CountUpdate) {
        self.send(
            update.lrt,
            LrtInput::CountUpdate {
                address: update.address,
                delta: update.delta,
            },
        );
    }

    fn broadcast_job_stamps(&mut self) {
        self.send_to_all(|| LrtInput::BroadcastStamps);
    }
}

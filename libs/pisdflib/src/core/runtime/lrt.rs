use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use pisdflib_ipc_types::{Fifo, FifoAttribute, JobMessage, Notification, ParameterMessage};
use tracing::{debug, trace, warn};

use crate::core::archi::Platform;
use crate::core::runtime::communicator::{Communicator, LrtEndpoint, LrtInput};
use crate::core::runtime::kernels::{KernelIo, KernelRegistry};
use crate::core::runtime::memory::MemoryInterface;

const SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// The thread runtime: one worker per LRT plus the driver-side
/// communicator.
pub struct RtPlatform {
    communicator: Communicator,
    threads: Vec<JoinHandle<()>>,
}

impl RtPlatform {
    /// Spawn one worker thread per LRT of the platform.
    pub fn spawn(
        platform: &Platform,
        kernels: Arc<KernelRegistry>,
        memory: Arc<MemoryInterface>,
    ) -> Self {
        let lrt_count = platform.lrt_count() as usize;
        let (communicator, endpoints) = Communicator::new(lrt_count);
        let threads = endpoints
            .into_iter()
            .map(|endpoint| {
                let kernels = Arc::clone(&kernels);
                let memory = Arc::clone(&memory);
                std::thread::Builder::new()
                    .name(format!("lrt-{}", endpoint.lrt.0))
                    .spawn(move || run_lrt(endpoint, kernels, memory))
                    .expect("spawning a worker thread")
            })
            .collect();
        Self {
            communicator,
            threads,
        }
    }

    pub fn communicator(&self) -> &Communicator {
        &self.communicator
    }

    pub fn communicator_mut(&mut self) -> &mut Communicator {
        &mut self.communicator
    }

    /// Stop every worker and join the threads.
    pub fn shutdown(self) {
        self.communicator.send_to_all(|| LrtInput::Shutdown);
        for thread in self.threads {
            let _ = thread.join();
        }
    }
}

/// Worker main loop: drain the queue, execute jobs in arrival order.
fn run_lrt(endpoint: LrtEndpoint, kernels: Arc<KernelRegistry>, memory: Arc<MemoryInterface>) {
    let lrt = endpoint.lrt;
    debug!("[lrt-{}] thread started", lrt.0);
    loop {
        let input = match endpoint.inputs.recv() {
            Ok(input) => input,
            Err(_) => break,
        };
        match input {
            LrtInput::Job(message) => {
                if let Err(error) = run_job(&endpoint, &kernels, &memory, &message) {
                    warn!("[lrt-{}] job {} failed: {error:#}", lrt.0, message.task_ix);
                    let _ = endpoint.notifications.send(Notification::LrtError {
                        sender: lrt.0,
                        message: format!("{error:#}"),
                    });
                }
                // The stamp advances even on failure so waiters unblock;
                // the iteration aborts driver-side anyway.
                endpoint.stamps.complete(lrt, message.job_exec_ix);
            }
            LrtInput::CountUpdate { address, delta } => {
                memory.add_count(address, i64::from(delta));
            }
            LrtInput::BroadcastStamps => endpoint.stamps.poke(),
            LrtInput::EndIteration => {
                let _ = endpoint
                    .notifications
                    .send(Notification::LrtEndIteration { sender: lrt.0 });
            }
            LrtInput::Clear => {}
            LrtInput::Shutdown => break,
        }
    }
    debug!("[lrt-{}] thread stopped", lrt.0);
}

fn run_job(
    endpoint: &LrtEndpoint,
    kernels: &KernelRegistry,
    memory: &MemoryInterface,
    message: &JobMessage,
) -> anyhow::Result<()> {
    let lrt = endpoint.lrt;
    // Cross-worker ordering: block until every constrained producer
    // stamped past its job index.
    let constraints: Vec<(u16, u32)> = message
        .exec_constraints
        .iter()
        .map(|c| (c.lrt_ix, c.job_exec_ix))
        .collect();
    if !endpoint.stamps.wait_for(&constraints, SYNC_TIMEOUT) {
        anyhow::bail!("timed out waiting for {constraints:?}");
    }
    trace!(
        "[lrt-{}] job {} (kernel {}) starting",
        lrt.0,
        message.task_ix,
        message.kernel_ix
    );

    let (inputs, releases) = materialize_inputs(memory, &message.input_fifos);
    let mut outputs: Vec<Vec<u8>> = message
        .output_fifos
        .iter()
        .map(|fifo| {
            if !matches!(fifo.attribute, FifoAttribute::RwOnly | FifoAttribute::RwExt) {
                memory.allocate(fifo.address, fifo.size, fifo.count);
            }
            vec![0u8; fifo.size as usize]
        })
        .collect();
    let mut output_params = Vec::new();

    let kernel = kernels
        .get(message.kernel_ix)
        .ok_or_else(|| anyhow::anyhow!("unknown kernel {}", message.kernel_ix))?;
    let mut io = KernelIo {
        params: &message.input_params,
        inputs: &inputs,
        outputs: &mut outputs,
        output_params: &mut output_params,
        memory,
    };
    kernel(&mut io)?;

    // Publish outputs, then release the inputs we own.
    for (fifo, data) in message.output_fifos.iter().zip(&outputs) {
        if !matches!(fifo.attribute, FifoAttribute::RwOnly | FifoAttribute::RwExt) {
            memory.write(fifo.address, fifo.offset, data);
        }
    }
    for (address, count) in releases {
        memory.consume(address, count);
    }

    if message.output_param_count > 0 {
        anyhow::ensure!(
            output_params.len() == message.output_param_count as usize,
            "kernel produced {} parameter(s), expected {}",
            output_params.len(),
            message.output_param_count
        );
        let _ = endpoint.parameters.send(ParameterMessage {
            task_ix: message.task_ix,
            params: output_params,
        });
        let _ = endpoint.notifications.send(Notification::JobSentParam {
            sender: lrt.0,
            task_ix: message.task_ix,
        });
    }
    Ok(())
}

/// Build the kernel-facing input buffers, honouring FIFO attributes:
/// merged entries concatenate their constituents, DUMMY entries are
/// skipped, external entries window the registered buffer.
fn materialize_inputs(
    memory: &MemoryInterface,
    fifos: &[Fifo],
) -> (Vec<Vec<u8>>, Vec<(u64, u16)>) {
    let mut inputs = Vec::new();
    let mut releases = Vec::new();
    let mut ix = 0;
    while ix < fifos.len() {
        let fifo = fifos[ix];
        match fifo.attribute {
            FifoAttribute::Dummy => {}
            FifoAttribute::RMerge => {
                memory.allocate(fifo.address, fifo.size, fifo.count);
                let mut data = Vec::with_capacity(fifo.size as usize);
                for _ in 0..fifo.offset {
                    ix += 1;
                    let ghost = fifos[ix];
                    let bytes = read_window(memory, &ghost);
                    data.extend_from_slice(&bytes);
                    if ghost.count > 0 {
                        releases.push((ghost.address, ghost.count));
                    }
                }
                memory.write(fifo.address, 0, &data);
                releases.push((fifo.address, 1));
                inputs.push(data);
            }
            _ => {
                inputs.push(read_window(memory, &fifo));
                if fifo.attribute != FifoAttribute::RwExt && fifo.count > 0 {
                    releases.push((fifo.address, fifo.count));
                }
            }
        }
        ix += 1;
    }
    (inputs, releases)
}

fn read_window(memory: &MemoryInterface, fifo: &Fifo) -> Vec<u8> {
    if fifo.size == 0 {
        return Vec::new();
    }
    match fifo.attribute {
        FifoAttribute::RwExt => {
            memory.read_external(fifo.address as usize, fifo.offset, fifo.size)
        }
        _ => memory.read(fifo.address, fifo.offset, fifo.size),
    }
}

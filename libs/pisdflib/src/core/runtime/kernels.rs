use std::sync::Arc;

use anyhow::{bail, ensure};
use pisdflib_ipc_types::kernel_ix;

use crate::core::runtime::memory::MemoryInterface;

/// Everything a kernel sees: positional parameters, materialised input
/// buffers, pre-sized output buffers and the shared memory interface (for
/// the persistent-delay and external-buffer built-ins).
pub struct KernelIo<'a> {
    pub params: &'a [i64],
    pub inputs: &'a [Vec<u8>],
    pub outputs: &'a mut [Vec<u8>],
    pub output_params: &'a mut Vec<i64>,
    pub memory: &'a MemoryInterface,
}

pub type KernelFn = Arc<dyn Fn(&mut KernelIo<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Kernel table shared by every worker. The built-in actors occupy the
/// first [`kernel_ix::FIRST_USER`] slots, user kernels follow.
pub struct KernelRegistry {
    kernels: Vec<KernelFn>,
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelRegistry {
    pub fn new() -> Self {
        let noop: KernelFn = Arc::new(|_io: &mut KernelIo<'_>| Ok(()));
        let mut kernels: Vec<KernelFn> = vec![noop; kernel_ix::FIRST_USER as usize];
        kernels[kernel_ix::FORK as usize] = Arc::new(fork);
        kernels[kernel_ix::JOIN as usize] = Arc::new(join);
        kernels[kernel_ix::HEAD as usize] = Arc::new(head);
        kernels[kernel_ix::TAIL as usize] = Arc::new(tail);
        kernels[kernel_ix::REPEAT as usize] = Arc::new(repeat);
        kernels[kernel_ix::DUPLICATE as usize] = Arc::new(duplicate);
        kernels[kernel_ix::INIT as usize] = Arc::new(init);
        kernels[kernel_ix::END as usize] = Arc::new(end);
        kernels[kernel_ix::EXTERN_OUT as usize] = Arc::new(extern_out);
        // EXTERN_IN, SEND and RECEIVE carry no data work of their own.
        Self { kernels }
    }

    /// Register a user kernel; returns the index to bind to a vertex.
    pub fn register(&mut self, kernel: KernelFn) -> u32 {
        self.kernels.push(kernel);
        self.kernels.len() as u32 - 1
    }

    pub fn get(&self, ix: u32) -> Option<&KernelFn> {
        self.kernels.get(ix as usize)
    }
}

// =========================================================================
// Built-in kernels
// =========================================================================

fn fork(io: &mut KernelIo<'_>) -> anyhow::Result<()> {
    let input_rate = io.params[0];
    let output_count = io.params[1] as usize;
    let mut offset = 0usize;
    for i in 0..output_count {
        let size = io.params[i + 2] as usize;
        io.outputs[i].copy_from_slice(&io.inputs[0][offset..offset + size]);
        offset += size;
    }
    ensure!(
        offset == input_rate as usize,
        "fork rates disagree: input {input_rate}, outputs {offset}"
    );
    Ok(())
}

fn join(io: &mut KernelIo<'_>) -> anyhow::Result<()> {
    let output_rate = io.params[0];
    let input_count = io.params[1] as usize;
    let mut offset = 0usize;
    for i in 0..input_count {
        let size = io.params[i + 2] as usize;
        io.outputs[0][offset..offset + size].copy_from_slice(&io.inputs[i][..size]);
        offset += size;
    }
    ensure!(
        offset == output_rate as usize,
        "join rates disagree: inputs {offset}, output {output_rate}"
    );
    Ok(())
}

fn head(io: &mut KernelIo<'_>) -> anyhow::Result<()> {
    let input_end = io.params[0] as usize;
    let mut offset = 0usize;
    for i in 0..input_end {
        let size = io.params[i + 1] as usize;
        io.outputs[0][offset..offset + size].copy_from_slice(&io.inputs[i][..size]);
        offset += size;
    }
    Ok(())
}

fn tail(io: &mut KernelIo<'_>) -> anyhow::Result<()> {
    let input_count = io.params[0] as usize;
    let first_input = io.params[1] as usize;
    let first_offset = io.params[2] as usize;
    let first_size = io.params[3] as usize;
    io.outputs[0][..first_size]
        .copy_from_slice(&io.inputs[first_input][first_offset..first_offset + first_size]);
    let mut offset = first_size;
    let mut param = 4;
    for i in first_input + 1..input_count {
        let size = io.params[param] as usize;
        param += 1;
        io.outputs[0][offset..offset + size].copy_from_slice(&io.inputs[i][..size]);
        offset += size;
    }
    Ok(())
}

fn repeat(io: &mut KernelIo<'_>) -> anyhow::Result<()> {
    let input_size = io.params[0] as usize;
    let output_size = io.params[1] as usize;
    if input_size == 0 {
        return Ok(());
    }
    if input_size >= output_size {
        io.outputs[0].copy_from_slice(&io.inputs[0][..output_size]);
        return Ok(());
    }
    let copies = output_size / input_size;
    let rest = output_size % input_size;
    for i in 0..copies {
        io.outputs[0][i * input_size..(i + 1) * input_size]
            .copy_from_slice(&io.inputs[0][..input_size]);
    }
    if rest > 0 {
        io.outputs[0][copies * input_size..].copy_from_slice(&io.inputs[0][..rest]);
    }
    Ok(())
}

fn duplicate(io: &mut KernelIo<'_>) -> anyhow::Result<()> {
    let output_count = io.params[0] as usize;
    let input_size = io.params[1] as usize;
    for i in 0..output_count {
        io.outputs[i].copy_from_slice(&io.inputs[0][..input_size]);
    }
    Ok(())
}

fn init(io: &mut KernelIo<'_>) -> anyhow::Result<()> {
    let persistent = io.params[0] != 0;
    let size = io.params[1] as usize;
    if persistent {
        let address = io.params[2] as u64;
        let saved = io.memory.read_persistent(address);
        ensure!(
            saved.len() == size,
            "persistent delay {address} has {} byte(s), expected {size}",
            saved.len()
        );
        io.outputs[0].copy_from_slice(&saved);
    } else {
        io.outputs[0].fill(0);
    }
    Ok(())
}

fn end(io: &mut KernelIo<'_>) -> anyhow::Result<()> {
    let persistent = io.params[0] != 0;
    if persistent {
        let address = io.params[2] as u64;
        io.memory.write_persistent(address, &io.inputs[0]);
    }
    Ok(())
}

fn extern_out(io: &mut KernelIo<'_>) -> anyhow::Result<()> {
    let buffer = io.params[0] as usize;
    let size = io.params[1] as usize;
    if io.inputs[0].len() < size {
        bail!(
            "extern output expected {size} byte(s), got {}",
            io.inputs[0].len()
        );
    }
    io.memory.write_external(buffer, 0, &io.inputs[0][..size]);
    Ok(())
}

//! The runtime proper: driver loop, worker threads, shared memory
//! interface, kernel registry and the queues between them.

mod communicator;
mod config;
mod driver;
mod kernels;
mod lrt;
mod memory;

pub use communicator::{Communicator, JobStamps, LrtEndpoint, LrtInput};
pub use config::RuntimeConfig;
pub use driver::Runtime;
pub use kernels::{KernelFn, KernelIo, KernelRegistry};
pub use lrt::RtPlatform;
pub use memory::MemoryInterface;

/// Install a default `tracing` subscriber honouring `RUST_LOG`; safe to
/// call more than once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

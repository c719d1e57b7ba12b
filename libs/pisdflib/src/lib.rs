//! Dynamic-dataflow runtime for parameterized interfaced synchronous
//! dataflow (PiSDF) applications on heterogeneous multi-core platforms.
//!
//! Each iteration resolves data-dependent parameters, computes firing
//! counts, derives per-firing dependencies across hierarchy and delays
//! without flattening to a single-rate graph, schedules and maps firings
//! onto processing elements, allocates communication FIFOs and dispatches
//! self-contained job messages to worker threads.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pisdflib::core::{
//!     AppBuilder, KernelIo, KernelRegistry, Platform, Runtime, RuntimeConfig,
//! };
//!
//! # fn main() -> pisdflib::core::Result<()> {
//! let mut archi = Platform::builder();
//! let hw = archi.add_hw_type("x86");
//! let cluster = archi.add_cluster("main");
//! archi.add_pe("P0", hw, cluster);
//! let platform = archi.build()?;
//!
//! let mut kernels = KernelRegistry::new();
//! let source = kernels.register(Arc::new(|io: &mut KernelIo<'_>| {
//!     io.outputs[0].fill(1);
//!     Ok(())
//! }));
//!
//! let mut builder = AppBuilder::new("app", &platform);
//! let root = builder.root();
//! let a = builder.add_actor(root, "A", 0, 1);
//! let b = builder.add_actor(root, "B", 1, 0);
//! builder.connect_const(root, a, 0, b, 0, 4, 4)?;
//! builder.rt_mut(root, a).set_kernel_ix(source);
//! # let sink = source;
//! builder.rt_mut(root, b).set_kernel_ix(sink);
//! let app = builder.finalize()?;
//!
//! let mut runtime = Runtime::new(app, platform, RuntimeConfig::default(), kernels, vec![])?;
//! runtime.execute()?;
//! runtime.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use core::{PisdfError, Result};

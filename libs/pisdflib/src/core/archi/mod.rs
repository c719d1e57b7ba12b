//! Hardware platform model: processing elements, clusters and the memory
//! buses between them. Read-only at runtime; built once through
//! [`PlatformBuilder`] and threaded through the scheduling components as a
//! shared borrow.

mod memory_bus;
mod pe;
mod platform;

pub use memory_bus::MemoryBus;
pub use pe::{Cluster, ClusterId, HwTypeId, LrtId, Pe, PeId};
pub use platform::{Platform, PlatformBuilder};

//! Per-iteration runtime state: the handler tree holding resolved
//! parameters, repetition vectors, rate caches and task registers for
//! every graph firing.

pub mod brv;
mod handlers;

pub use handlers::{
    FiringId, FiringParam, FiringParamKind, GraphFiring, GraphHandler, HandlerId, Handlers,
    SnapshotScope, UNSET_IX,
};

pub mod archi;
pub mod deps;
pub mod error;
pub mod expr;
pub mod firing;
pub mod graph;
pub mod math;
pub mod param;
pub mod rt_info;
pub mod runtime;
pub mod scheduling;

pub use archi::{Cluster, ClusterId, HwTypeId, LrtId, MemoryBus, Pe, PeId, Platform, PlatformBuilder};
pub use deps::{
    cons_dependencies, cons_dependency_count, exec_dependencies, exec_dependency_count,
    ExecDependency,
};
pub use error::{PisdfError, Result};
pub use expr::{Expression, NoParams, ParamBinding, ParamTable};
pub use firing::{FiringId, GraphFiring, GraphHandler, HandlerId, Handlers, UNSET_IX};
pub use graph::{App, AppBuilder, Delay, Edge, EdgeId, Graph, GraphId, Vertex, VertexId, VertexKind};
pub use param::{DeclScope, Param, ParamKind};
pub use rt_info::RtInfo;
pub use runtime::{
    init_tracing, KernelFn, KernelIo, KernelRegistry, MemoryInterface, Runtime, RuntimeConfig,
};
pub use scheduling::{
    ExecutionPolicy, MappingPolicy, ResourcesAllocator, Schedule, ScheduleStats, SchedulingPolicy,
    Task, TaskKind, TaskState,
};

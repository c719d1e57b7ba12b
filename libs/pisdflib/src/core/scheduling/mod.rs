//! Task construction, ordering, mapping, FIFO allocation and job
//! dispatch for one iteration.

mod fifo_alloc;
mod launcher;
mod mapper;
mod resources;
mod schedule;
mod scheduler;
mod task;

pub use fifo_alloc::{CountUpdate, FifoAllocator};
pub use launcher::{ExecutionPolicy, JobSink, TaskLauncher};
pub use mapper::{make_mapper, BestFitMapper, Mapper, MappingPolicy, RoundRobinMapper};
pub use resources::ResourcesAllocator;
pub use schedule::{GanttRecord, PeStats, Schedule, ScheduleStats};
pub use scheduler::{make_scheduler, GreedyScheduler, ListScheduler, Scheduler, SchedulingPolicy};
pub use task::{SyncKind, Task, TaskKind, TaskState};

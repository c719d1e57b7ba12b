use tracing::debug;

use crate::core::archi::Platform;
use crate::core::error::Result;
use crate::core::firing::Handlers;
use crate::core::graph::App;
use crate::core::scheduling::fifo_alloc::FifoAllocator;
use crate::core::scheduling::launcher::{ExecutionPolicy, JobSink, TaskLauncher};
use crate::core::scheduling::mapper::{make_mapper, Mapper, MappingPolicy};
use crate::core::scheduling::schedule::Schedule;
use crate::core::scheduling::scheduler::{make_scheduler, Scheduler, SchedulingPolicy};

/// One-stop orchestration of a scheduling pass: scheduler, mapper, FIFO
/// allocator and launcher wired together under one execution policy.
pub struct ResourcesAllocator {
    scheduler: Box<dyn Scheduler + Send>,
    mapper: Box<dyn Mapper + Send>,
    allocator: FifoAllocator,
    schedule: Schedule,
    execution_policy: ExecutionPolicy,
}

impl ResourcesAllocator {
    pub fn new(
        scheduling: SchedulingPolicy,
        mapping: MappingPolicy,
        execution: ExecutionPolicy,
        platform: &Platform,
        first_address: u64,
    ) -> Self {
        Self {
            scheduler: make_scheduler(scheduling),
            mapper: make_mapper(mapping),
            allocator: FifoAllocator::new(first_address),
            schedule: Schedule::new(platform),
            execution_policy: execution,
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Schedule, map, allocate and dispatch everything currently runnable.
    pub fn execute(
        &mut self,
        app: &App,
        platform: &Platform,
        handlers: &mut Handlers,
        sink: &mut dyn JobSink,
    ) -> Result<()> {
        let offset = self.schedule.len();
        self.scheduler
            .schedule(app, platform, handlers, &mut self.schedule)?;
        debug!(
            new_tasks = self.schedule.len() - offset,
            "scheduling pass produced tasks"
        );
        self.mapper.set_start_time(self.schedule.min_pe_end_time());
        match self.execution_policy {
            ExecutionPolicy::Jit => {
                let mut ix = offset as u32;
                while (ix as usize) < self.schedule.len() {
                    let final_ix =
                        self.mapper
                            .map(app, platform, handlers, &mut self.schedule, ix)?;
                    // Freshly inserted synchronisation halves go out first.
                    for sync_ix in ix..final_ix {
                        TaskLauncher::launch(app, handlers, &mut self.schedule, sync_ix, sink)?;
                    }
                    self.allocator
                        .allocate(app, handlers, &mut self.schedule, final_ix)?;
                    for update in self.allocator.take_updates() {
                        sink.update_count(update);
                    }
                    TaskLauncher::launch(app, handlers, &mut self.schedule, final_ix, sink)?;
                    self.mapper.set_start_time(self.schedule.min_pe_end_time());
                    ix = final_ix + 1;
                }
            }
            ExecutionPolicy::Delayed => {
                let mut ix = offset as u32;
                while (ix as usize) < self.schedule.len() {
                    let final_ix =
                        self.mapper
                            .map(app, platform, handlers, &mut self.schedule, ix)?;
                    self.mapper.set_start_time(self.schedule.min_pe_end_time());
                    ix = final_ix + 1;
                }
                for ix in offset..self.schedule.len() {
                    self.allocator
                        .allocate(app, handlers, &mut self.schedule, ix as u32)?;
                    for update in self.allocator.take_updates() {
                        sink.update_count(update);
                    }
                }
                for ix in offset..self.schedule.len() {
                    TaskLauncher::launch(app, handlers, &mut self.schedule, ix as u32, sink)?;
                }
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.scheduler.clear();
        self.allocator.clear();
        self.schedule.clear();
    }
}

use serde::Serialize;

use crate::core::scheduling::{ExecutionPolicy, MappingPolicy, SchedulingPolicy};

/// Policies of one runtime instance.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RuntimeConfig {
    pub scheduling: SchedulingPolicy,
    pub mapping: MappingPolicy,
    pub execution: ExecutionPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduling: SchedulingPolicy::List,
            mapping: MappingPolicy::BestFit,
            execution: ExecutionPolicy::Jit,
        }
    }
}

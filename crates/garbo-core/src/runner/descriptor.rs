//! TaskDescriptor - what the runner knows about a task before it runs.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::TaskName;
use crate::error::GarboError;
use crate::tuner::TunableLoop;

/// Builds a fresh loop for every run of a task.
///
/// Called only after the task's lock is held, so a factory may do real work
/// (open a cursor, load a resume point).
#[async_trait]
pub trait LoopFactory: Send + Sync {
    async fn build(&self, name: &TaskName) -> Result<Box<dyn TunableLoop>, GarboError>;
}

#[derive(Clone)]
pub struct TaskDescriptor {
    name: TaskName,
    factory: Arc<dyn LoopFactory>,
    experimental: bool,
}

impl TaskDescriptor {
    pub fn new(name: TaskName, factory: Arc<dyn LoopFactory>) -> Self {
        Self {
            name,
            factory,
            experimental: false,
        }
    }

    pub fn experimental(mut self, experimental: bool) -> Self {
        self.experimental = experimental;
        self
    }

    pub fn name(&self) -> &TaskName {
        &self.name
    }

    pub fn is_experimental(&self) -> bool {
        self.experimental
    }

    pub fn factory(&self) -> &Arc<dyn LoopFactory> {
        &self.factory
    }
}

impl fmt::Debug for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.name)
            .field("experimental", &self.experimental)
            .finish_non_exhaustive()
    }
}

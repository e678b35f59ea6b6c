//! TaskRegistry - which tasks belong to which task set.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::GarboConfig;
use crate::domain::{TaskName, TaskSet};
use crate::error::GarboError;
use crate::ports::{JobStateStore, PruneStore};
use crate::pruner::PrunerFactory;
use crate::runner::TaskDescriptor;

struct Entry {
    sets: Vec<TaskSet>,
    descriptor: TaskDescriptor,
}

/// Registry of task descriptors.
///
/// Task names double as lock names and job-state keys, so a name may only
/// be registered once across all sets.
#[derive(Default)]
pub struct TaskRegistry {
    entries: Vec<Entry>,
    names: HashSet<TaskName>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        sets: &[TaskSet],
        descriptor: TaskDescriptor,
    ) -> Result<(), GarboError> {
        if !self.names.insert(descriptor.name().clone()) {
            return Err(GarboError::DuplicateTask(descriptor.name().clone()));
        }
        self.entries.push(Entry {
            sets: sets.to_vec(),
            descriptor,
        });
        Ok(())
    }

    /// Register every configured task as a pruner over `store`.
    pub fn from_config(
        config: &GarboConfig,
        store: Arc<dyn PruneStore>,
        job_state: Arc<dyn JobStateStore>,
    ) -> Result<Self, GarboError> {
        let mut registry = Self::new();
        for task in &config.tasks {
            let factory = PrunerFactory::new(
                task.prune_job()?,
                Arc::clone(&store),
                Arc::clone(&job_state),
            )
            .with_bounds(task.chunk_bounds()?);
            let descriptor = TaskDescriptor::new(task.name.clone(), Arc::new(factory))
                .experimental(task.experimental);
            registry.register(&task.sets, descriptor)?;
        }
        Ok(registry)
    }

    /// Tasks of `set` in registration order; experimental tasks are only
    /// included when asked for, after all the others.
    pub fn tasks_for(&self, set: TaskSet, experimental: bool) -> Vec<TaskDescriptor> {
        let in_set = self.entries.iter().filter(|e| e.sets.contains(&set));
        let (mut stable, trial): (Vec<_>, Vec<_>) =
            in_set.partition(|e| !e.descriptor.is_experimental());
        if experimental {
            stable.extend(trial);
        }
        stable.into_iter().map(|e| e.descriptor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

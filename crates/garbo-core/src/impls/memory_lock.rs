//! MemoryLockManager - process-local advisory locks.
//!
//! Useful for tests and for single-host setups where every scheduler runs in
//! the same process. Clones share the same lock table.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::domain::TaskName;
use crate::error::GarboError;
use crate::ports::{LockManager, TaskLock};

#[derive(Debug, Clone, Default)]
pub struct MemoryLockManager {
    held: Arc<Mutex<HashSet<TaskName>>>,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, name: &TaskName) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name)
    }
}

impl LockManager for MemoryLockManager {
    fn try_acquire(&self, name: &TaskName) -> Result<Option<Box<dyn TaskLock>>, GarboError> {
        let mut held = self.held.lock().map_err(|_| GarboError::Poisoned)?;
        if !held.insert(name.clone()) {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryTaskLock {
            name: name.clone(),
            held: Arc::clone(&self.held),
            released: false,
        })))
    }
}

struct MemoryTaskLock {
    name: TaskName,
    held: Arc<Mutex<HashSet<TaskName>>>,
    released: bool,
}

impl MemoryTaskLock {
    fn unlock(&mut self) {
        if !self.released {
            self.held
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&self.name);
            self.released = true;
        }
    }
}

impl TaskLock for MemoryTaskLock {
    fn name(&self) -> &TaskName {
        &self.name
    }

    fn location(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn release(mut self: Box<Self>) -> Result<(), GarboError> {
        self.unlock();
        Ok(())
    }
}

impl Drop for MemoryTaskLock {
    fn drop(&mut self) {
        self.unlock();
    }
}

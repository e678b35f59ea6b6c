//! TaskQueue - the shared list of tasks still to run.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::TaskDescriptor;

/// Mutex-guarded deque. Each pop hands a descriptor to exactly one worker;
/// nothing is lost between a pop and a push back.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<TaskDescriptor>>,
}

impl TaskQueue {
    pub fn new(tasks: impl IntoIterator<Item = TaskDescriptor>) -> Self {
        Self {
            tasks: Mutex::new(tasks.into_iter().collect()),
        }
    }

    pub fn pop(&self) -> Option<TaskDescriptor> {
        self.lock().pop_front()
    }

    /// Put a task back at the end of the queue.
    pub fn push_back(&self, task: TaskDescriptor) {
        self.lock().push_back(task);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<TaskDescriptor>> {
        // a panic while holding the guard cannot leave the deque half-updated
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::domain::TaskName;
    use crate::error::GarboError;
    use crate::runner::LoopFactory;
    use crate::tuner::TunableLoop;

    struct NoLoop;

    #[async_trait]
    impl LoopFactory for NoLoop {
        async fn build(&self, name: &TaskName) -> Result<Box<dyn TunableLoop>, GarboError> {
            Err(GarboError::Config(format!("{name} is not buildable")))
        }
    }

    fn descriptor(name: &str) -> TaskDescriptor {
        TaskDescriptor::new(TaskName::new(name).unwrap(), Arc::new(NoLoop))
    }

    #[test]
    fn pops_in_order_and_requeues_at_the_back() {
        let queue = TaskQueue::new([descriptor("a"), descriptor("b")]);
        let a = queue.pop().unwrap();
        queue.push_back(a);

        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(order, vec!["b", "a"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_pops_hand_out_each_task_once() {
        let names: Vec<String> = (0..200).map(|i| format!("task-{i}")).collect();
        let queue = Arc::new(TaskQueue::new(names.iter().map(|n| descriptor(n))));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(task) = queue.pop() {
                        seen.push(task.name().to_string());
                    }
                    seen
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }
        let unique: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(all.len(), 200);
        assert_eq!(unique.len(), 200);
    }
}

//! Worker loop: pop a task, lock it, run it, release it, repeat.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::task::AbortHandle;
use tracing::Instrument;

use super::budget::{BudgetContext, TimeBudgetPolicy, task_budget};
use super::{TaskDescriptor, TaskQueue};
use crate::domain::{RunReport, TaskName, TaskState};
use crate::error::GarboError;
use crate::ports::{Clock, LockManager, TaskLock};
use crate::tuner::{LoopSummary, LoopTuner};

/// State shared by all workers of one run.
pub(super) struct Shared {
    pub queue: TaskQueue,
    pub states: Mutex<BTreeMap<TaskName, TaskState>>,
    pub failures: AtomicUsize,
    pub deadline: Instant,
    pub clock: Arc<dyn Clock>,
    pub locks: Arc<dyn LockManager>,
    pub tuner: LoopTuner,
    pub budget: Arc<dyn TimeBudgetPolicy>,
    pub workers: usize,
    pub requeue_threshold: Duration,
    pub requeue_pause: Duration,
    pub bodies: Mutex<Bodies>,
}

/// Loop bodies currently running on their own tokio task.
#[derive(Default)]
pub(super) struct Bodies {
    running: HashMap<TaskName, AbortHandle>,
    cancelled: bool,
}

impl Shared {
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(self.clock.now())
    }

    fn set_state(&self, name: &TaskName, state: TaskState) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.clone(), state);
    }

    fn fail(&self, name: &TaskName) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.set_state(name, TaskState::Failed);
    }

    pub fn report(&self, started: Instant, abandoned: Vec<TaskName>) -> RunReport {
        let states = self
            .states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let with = |wanted: fn(&TaskState) -> bool| -> Vec<TaskName> {
            states
                .iter()
                .filter(|(_, state)| wanted(state))
                .map(|(name, _)| name.clone())
                .collect()
        };
        RunReport {
            not_started: with(|s| s.is_unstarted()),
            skipped: with(|s| *s == TaskState::Skipped),
            failures: self.failures.load(Ordering::SeqCst),
            elapsed: self.clock.now().saturating_duration_since(started),
            abandoned,
            states,
        }
    }

    fn track(&self, name: &TaskName, body: AbortHandle) {
        let mut bodies = self.bodies.lock().unwrap_or_else(|e| e.into_inner());
        if bodies.cancelled {
            body.abort();
        } else {
            bodies.running.insert(name.clone(), body);
        }
    }

    fn untrack(&self, name: &TaskName) {
        self.bodies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .running
            .remove(name);
    }

    /// Cancel every running loop body, and any body started from now on.
    ///
    /// A cancelled body is dropped at its next await point; the worker that
    /// owns it releases the lock only after that.
    pub fn cancel_bodies(&self) {
        let mut bodies = self.bodies.lock().unwrap_or_else(|e| e.into_inner());
        bodies.cancelled = true;
        for (_, body) in bodies.running.drain() {
            body.abort();
        }
    }

    /// Names of tasks a worker was still busy with.
    pub fn in_flight(&self) -> Vec<TaskName> {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, s)| matches!(s, TaskState::Locked | TaskState::Running))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

pub(super) async fn worker_loop(worker_id: usize, shared: Arc<Shared>) {
    let span = tracing::debug_span!("worker", id = worker_id + 1);
    async move {
        tracing::debug!("worker running");
        loop {
            if shared.remaining().is_zero() {
                // reported by the runner once all workers are done
                tracing::debug!("worker detected script timeout");
                break;
            }
            let Some(task) = shared.queue.pop() else {
                break;
            };
            let span = tracing::info_span!("task", name = %task.name());
            run_task(&shared, task).instrument(span).await;
        }
    }
    .instrument(span)
    .await
}

async fn run_task(shared: &Arc<Shared>, task: TaskDescriptor) {
    let name = task.name().clone();
    match shared.locks.try_acquire(&name) {
        Ok(Some(lock)) => run_locked(shared, task, lock).await,
        Ok(None) => lock_contended(shared, task).await,
        Err(err) => {
            tracing::error!(error = %err, "unable to take task lock");
            shared.fail(&name);
        }
    }
}

async fn lock_contended(shared: &Shared, task: TaskDescriptor) {
    let remaining = shared.remaining();
    if remaining > shared.requeue_threshold {
        tracing::debug!("unable to acquire lock, running elsewhere?");
        shared.set_state(task.name(), TaskState::Deferred);
        let jitter: f64 = rand::thread_rng().gen_range(0.5..1.5);
        tokio::time::sleep(shared.requeue_pause.mul_f64(jitter)).await;
        shared.queue.push_back(task);
    } else {
        tracing::warn!(
            remaining_secs = remaining.as_secs(),
            "unable to acquire lock, running elsewhere? skipping"
        );
        shared.set_state(task.name(), TaskState::Skipped);
    }
}

async fn run_locked(shared: &Arc<Shared>, task: TaskDescriptor, lock: Box<dyn TaskLock>) {
    let name = task.name().clone();
    shared.set_state(&name, TaskState::Locked);
    tracing::debug!(lock = %lock.location(), "acquired lock");

    let now = shared.clock.now();
    let budget = task_budget(
        shared.budget.as_ref(),
        &BudgetContext {
            remaining: shared.deadline.saturating_duration_since(now),
            remaining_tasks: shared.queue.len() + 1,
            workers: shared.workers,
        },
    );
    tracing::info!(budget_secs = budget.as_secs_f64(), "running task");
    shared.set_state(&name, TaskState::Running);

    let state = match execute(shared, &task, now + budget).await {
        Ok(LoopSummary {
            finished: true,
            iterations,
            elapsed,
        }) => {
            tracing::info!(iterations, elapsed_secs = elapsed.as_secs_f64(), "task completed");
            TaskState::Completed
        }
        Ok(summary) => {
            tracing::info!(iterations = summary.iterations, "task aborted, work left for next run");
            TaskState::Aborted
        }
        Err(GarboError::Cancelled(_)) => {
            tracing::warn!("task cancelled after grace period, work left for next run");
            TaskState::Aborted
        }
        Err(err) if err.is_transient() => {
            tracing::warn!(error = %err, "task interrupted, will continue next run");
            TaskState::Interrupted
        }
        Err(err) => {
            tracing::error!(error = %err, "unhandled error");
            shared.failures.fetch_add(1, Ordering::SeqCst);
            TaskState::Failed
        }
    };

    let location = lock.location();
    match lock.release() {
        Ok(()) => tracing::debug!(lock = %location, "released lock"),
        Err(err) => tracing::warn!(lock = %location, error = %err, "failed to release lock"),
    }
    shared.set_state(&name, state);
}

/// Build and run the loop on its own tokio task so a panic inside it ends
/// up as an error here. The body stays registered in `shared` until it has
/// stopped, so the runner can cancel it.
async fn execute(
    shared: &Arc<Shared>,
    task: &TaskDescriptor,
    abort_at: Instant,
) -> Result<LoopSummary, GarboError> {
    let factory = Arc::clone(task.factory());
    let name = task.name().clone();
    let body_shared = Arc::clone(shared);
    let body_name = name.clone();
    let handle = tokio::spawn(
        async move {
            let mut task_loop = factory.build(&body_name).await?;
            body_shared.tuner.run(task_loop.as_mut(), abort_at).await
        }
        .in_current_span(),
    );
    shared.track(&name, handle.abort_handle());
    let result = handle.await;
    shared.untrack(&name);
    Ok(result??)
}

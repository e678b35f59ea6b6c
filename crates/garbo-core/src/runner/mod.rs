//! Runner - runs a list of tasks on a pool of workers before a deadline.
//!
//! Each worker pops the next task, takes its advisory lock without waiting,
//! and runs it through the [`LoopTuner`] with a per-task budget. Tasks whose
//! lock is busy go back to the end of the queue while enough time is left,
//! and are skipped otherwise. Errors are caught per task, logged and counted;
//! they never stop the other tasks.

pub mod budget;
pub mod descriptor;
pub mod queue;
mod worker;

use std::collections::BTreeMap;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub use self::budget::{BudgetContext, EvenSplit, FixedBudget, TimeBudgetPolicy};
pub use self::descriptor::{LoopFactory, TaskDescriptor};
pub use self::queue::TaskQueue;

use tokio::task::JoinHandle;

use self::worker::{Shared, worker_loop};
use crate::domain::{RunReport, TaskState};
use crate::ports::{Clock, LockManager, SystemClock};
use crate::tuner::{DEFAULT_GOAL, LoopTuner};

/// Script timeout used when none is given.
pub const NO_DEADLINE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// How long cancelled loop bodies get to unwind before the runner gives up
/// on their workers.
const CANCEL_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct RunnerOptions {
    pub threads: usize,
    /// Global deadline, measured from the start of the run.
    pub abort_script: Option<Duration>,
    pub budget: Arc<dyn TimeBudgetPolicy>,
    pub goal: Duration,
    pub cooldown: Option<Duration>,
    /// Extra time running tasks get to stop after the deadline.
    pub grace: Duration,
    /// Tasks whose lock is busy are re-queued only while more than this is
    /// left before the deadline.
    pub requeue_threshold: Duration,
    pub requeue_pause: Duration,
    pub maximum_chunk_size: Option<f64>,
}

impl RunnerOptions {
    /// `--abort-task`: a fixed budget instead of the even split.
    pub fn with_abort_task(mut self, abort_task: Option<Duration>) -> Self {
        self.budget = match abort_task {
            Some(d) => Arc::new(FixedBudget(d)),
            None => Arc::new(EvenSplit),
        };
        self
    }
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            abort_script: None,
            budget: Arc::new(EvenSplit),
            goal: DEFAULT_GOAL,
            cooldown: None,
            grace: Duration::from_secs(60),
            requeue_threshold: Duration::from_secs(60),
            requeue_pause: Duration::from_millis(300),
            maximum_chunk_size: None,
        }
    }
}

pub struct Runner {
    locks: Arc<dyn LockManager>,
    clock: Arc<dyn Clock>,
    options: RunnerOptions,
}

impl Runner {
    pub fn new(locks: Arc<dyn LockManager>, options: RunnerOptions) -> Self {
        Self {
            locks,
            clock: Arc::new(SystemClock),
            options,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Cap the chunk size of every loop, so small test data still takes
    /// several chunks.
    pub fn with_maximum_chunk_size(mut self, maximum: f64) -> Self {
        self.options.maximum_chunk_size = Some(maximum);
        self
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Run `tasks` with the deadline `abort_script` from now.
    pub async fn run(&self, tasks: Vec<TaskDescriptor>) -> RunReport {
        let timeout = self.options.abort_script.unwrap_or(NO_DEADLINE);
        self.run_until(tasks, self.clock.now() + timeout).await
    }

    pub async fn run_until(&self, tasks: Vec<TaskDescriptor>, deadline: Instant) -> RunReport {
        let started = self.clock.now();
        let workers = self.options.threads.max(1);
        let states: BTreeMap<_, _> = tasks
            .iter()
            .map(|t| (t.name().clone(), TaskState::Pending))
            .collect();

        let tuner = LoopTuner::new(Arc::clone(&self.clock))
            .with_goal(self.options.goal)
            .with_cooldown(self.options.cooldown)
            .with_maximum_chunk_size(self.options.maximum_chunk_size);
        let shared = Arc::new(Shared {
            queue: TaskQueue::new(tasks),
            states: Mutex::new(states),
            failures: AtomicUsize::new(0),
            deadline,
            clock: Arc::clone(&self.clock),
            locks: Arc::clone(&self.locks),
            tuner,
            budget: Arc::clone(&self.options.budget),
            workers,
            requeue_threshold: self.options.requeue_threshold,
            requeue_pause: self.options.requeue_pause,
            bodies: Mutex::default(),
        });

        if shared.remaining().is_zero() {
            let report = shared.report(started, Vec::new());
            tracing::warn!(
                tasks = ?report.not_started,
                "script deadline already passed, {} tasks did not run",
                report.not_started.len()
            );
            return report;
        }

        tracing::info!(workers, tasks = shared.queue.len(), "starting run");
        let mut joins: Vec<_> = (0..workers)
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&shared))))
            .collect();

        let wait = shared.remaining() + self.options.grace;
        let mut abandoned = Vec::new();
        if tokio::time::timeout(wait, join_workers(&mut joins))
            .await
            .is_err()
        {
            abandoned = shared.in_flight();
            tracing::warn!(
                tasks = ?abandoned,
                "tasks still running after grace period, cancelling"
            );
            shared.cancel_bodies();
            if tokio::time::timeout(CANCEL_WAIT, join_workers(&mut joins))
                .await
                .is_err()
            {
                // their locks stay held until the bodies stop
                tracing::error!(workers = joins.len(), "workers did not stop after cancel");
            }
        }

        if shared.remaining().is_zero() {
            tracing::info!("script aborted after deadline");
        }
        let report = shared.report(started, abandoned);
        if !report.not_started.is_empty() {
            tracing::warn!(
                tasks = ?report.not_started,
                "{} tasks did not run",
                report.not_started.len()
            );
        }
        if report.failures > 0 {
            tracing::error!("{} tasks failed", report.failures);
        }
        report
    }
}

/// Wait for every worker; a worker is dropped from `joins` once joined.
async fn join_workers(joins: &mut Vec<JoinHandle<()>>) {
    while let Some(join) = joins.last_mut() {
        if let Err(err) = join.await {
            tracing::error!(error = %err, "worker stopped unexpectedly");
        }
        joins.pop();
    }
}

//! Per-task time budgets.
//!
//! A budget is worked out each time a worker picks up a task, from the time
//! left before the script deadline. Whatever the policy says, a task never
//! gets more than that.

use std::time::Duration;

/// Inputs to a budget decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetContext {
    /// Time left before the script deadline.
    pub remaining: Duration,
    /// Tasks not yet finished, including the one being picked up.
    pub remaining_tasks: usize,
    pub workers: usize,
}

pub trait TimeBudgetPolicy: Send + Sync {
    /// How long the task being picked up may run. Capped at
    /// `ctx.remaining` by the caller.
    fn budget(&self, ctx: &BudgetContext) -> Duration;
}

/// Same budget for every task (`--abort-task`).
#[derive(Debug, Clone, Copy)]
pub struct FixedBudget(pub Duration);

impl TimeBudgetPolicy for FixedBudget {
    fn budget(&self, _ctx: &BudgetContext) -> Duration {
        self.0
    }
}

/// Spread the remaining time over the remaining tasks.
///
/// With at least one worker per remaining task, a task may run until the
/// deadline. Otherwise it gets `workers * remaining / remaining_tasks`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvenSplit;

impl TimeBudgetPolicy for EvenSplit {
    fn budget(&self, ctx: &BudgetContext) -> Duration {
        let workers = ctx.workers.max(1);
        if ctx.remaining_tasks <= workers {
            return ctx.remaining;
        }
        let nanos = ctx.remaining.as_nanos() * workers as u128 / ctx.remaining_tasks as u128;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Apply `policy` and cap the result at the remaining script time.
pub fn task_budget(policy: &dyn TimeBudgetPolicy, ctx: &BudgetContext) -> Duration {
    policy.budget(ctx).min(ctx.remaining)
}

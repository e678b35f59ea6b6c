//! Task state machine for one scheduler run.

use serde::{Deserialize, Serialize};

/// State of a task within one run of the scheduler.
///
/// State transitions:
/// - Pending -> Locked -> Running -> Completed | Aborted | Interrupted | Failed
/// - Pending -> Deferred -> Pending (lock held elsewhere, time remains)
/// - Pending -> Skipped (lock held elsewhere, not enough time left)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting in the queue.
    Pending,

    /// Lock acquired, loop not yet built.
    Locked,

    /// Loop is executing chunks.
    Running,

    /// The loop reported it has no more work.
    Completed,

    /// The task deadline passed before the loop finished, or the runner
    /// cancelled it after the grace period. Remaining work is left for the
    /// next run.
    Aborted,

    /// A batch was rolled back by a transient failure; retried next run.
    Interrupted,

    /// The loop raised an unhandled error. Counted in the failure tally.
    Failed,

    /// Lock was held elsewhere; the task went back to the end of the queue.
    Deferred,

    /// Lock was held elsewhere and too little time was left to retry.
    Skipped,
}

impl TaskState {
    /// Did the task never get past the queue?
    pub fn is_unstarted(self) -> bool {
        matches!(self, TaskState::Pending | TaskState::Deferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::pending(TaskState::Pending, true)]
    #[case::deferred(TaskState::Deferred, true)]
    #[case::locked(TaskState::Locked, false)]
    #[case::running(TaskState::Running, false)]
    #[case::completed(TaskState::Completed, false)]
    #[case::skipped(TaskState::Skipped, false)]
    fn unstarted_states(#[case] state: TaskState, #[case] unstarted: bool) {
        assert_eq!(state.is_unstarted(), unstarted);
    }

    #[test]
    fn serializes_as_snake_case() {
        let s = serde_json::to_string(&TaskState::Interrupted).unwrap();
        assert_eq!(s, "\"interrupted\"");
    }
}

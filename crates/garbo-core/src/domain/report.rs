//! Outcome of one scheduler run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{TaskName, TaskState};

/// Final view of a run, built once all workers have stopped (or the grace
/// period expired).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Last recorded state of every configured task.
    pub states: BTreeMap<TaskName, TaskState>,

    /// Number of tasks that raised an unhandled error.
    pub failures: usize,

    /// Tasks still queued when the script deadline passed.
    pub not_started: Vec<TaskName>,

    /// Tasks whose lock was held elsewhere with too little time left to retry.
    pub skipped: Vec<TaskName>,

    /// Tasks still running when the grace period after the deadline expired.
    pub abandoned: Vec<TaskName>,

    pub elapsed: Duration,
}

impl RunReport {
    pub fn state_of(&self, name: &TaskName) -> Option<TaskState> {
        self.states.get(name).copied()
    }

    pub fn count(&self, state: TaskState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    pub fn is_success(&self) -> bool {
        self.failures == 0
    }

    /// Process exit status: the number of failed tasks, saturating at 255.
    pub fn exit_code(&self) -> u8 {
        u8::try_from(self.failures).unwrap_or(u8::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_saturates() {
        let mut report = RunReport::default();
        assert_eq!(report.exit_code(), 0);
        assert!(report.is_success());

        report.failures = 3;
        assert_eq!(report.exit_code(), 3);

        report.failures = 1000;
        assert_eq!(report.exit_code(), 255);
    }

    #[test]
    fn counts_states() {
        let mut report = RunReport::default();
        report
            .states
            .insert(TaskName::new("a").unwrap(), TaskState::Completed);
        report
            .states
            .insert(TaskName::new("b").unwrap(), TaskState::Completed);
        report
            .states
            .insert(TaskName::new("c").unwrap(), TaskState::Failed);
        assert_eq!(report.count(TaskState::Completed), 2);
        assert_eq!(
            report.state_of(&TaskName::new("c").unwrap()),
            Some(TaskState::Failed)
        );
    }
}

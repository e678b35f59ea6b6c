use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::GarboError;

/// Named group of tasks run together by one invocation of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSet {
    Frequent,
    Hourly,
    Daily,
}

impl TaskSet {
    pub const ALL: [TaskSet; 3] = [TaskSet::Frequent, TaskSet::Hourly, TaskSet::Daily];

    /// Default script timeout. Each leaves some slack so a run is fully
    /// terminated before the next scheduled run of the same set starts.
    pub fn default_script_timeout(self) -> Duration {
        match self {
            TaskSet::Frequent => Duration::from_secs(5 * 60 - 20),
            TaskSet::Hourly => Duration::from_secs(55 * 60),
            TaskSet::Daily => Duration::from_secs(23 * 60 * 60 + 30 * 60),
        }
    }

    /// Name used for the script-level log span.
    pub fn script_name(self) -> &'static str {
        match self {
            TaskSet::Frequent => "garbo-frequently",
            TaskSet::Hourly => "garbo-hourly",
            TaskSet::Daily => "garbo-daily",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskSet::Frequent => "frequent",
            TaskSet::Hourly => "hourly",
            TaskSet::Daily => "daily",
        }
    }
}

impl fmt::Display for TaskSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskSet {
    type Err = GarboError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskSet::ALL
            .into_iter()
            .find(|set| set.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                GarboError::Config(format!(
                    "unknown task set {s:?} (expected frequent, hourly or daily)"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Daily".parse::<TaskSet>().unwrap(), TaskSet::Daily);
        assert_eq!("frequent".parse::<TaskSet>().unwrap(), TaskSet::Frequent);
        assert!("weekly".parse::<TaskSet>().is_err());
    }

    #[test]
    fn default_timeouts_leave_slack_before_next_run() {
        assert_eq!(TaskSet::Frequent.default_script_timeout(), Duration::from_secs(280));
        assert!(TaskSet::Hourly.default_script_timeout() < Duration::from_secs(3600));
        assert!(TaskSet::Daily.default_script_timeout() < Duration::from_secs(86_400));
    }
}

use thiserror::Error;

use crate::domain::TaskName;

#[derive(Debug, Error)]
pub enum GarboError {
    /// A batch was rolled back (e.g. a row became referenced after the
    /// candidate set was computed). The task may continue on its next run.
    #[error("batch rolled back: {0}")]
    Transient(String),

    #[error("cursor {0} is no longer usable")]
    CursorLost(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lock error for {name}: {message}")]
    Lock { name: TaskName, message: String },

    #[error("invalid {kind} name {value:?}")]
    InvalidName { kind: &'static str, value: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate task {0}")]
    DuplicateTask(TaskName),

    #[error("storage connection poisoned")]
    Poisoned,

    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// The runner cancelled a loop that outlived its grace period.
    #[error("task cancelled: {0}")]
    Cancelled(String),
}

impl GarboError {
    /// Transient failures end the current run of a task without counting
    /// towards the failure tally.
    pub fn is_transient(&self) -> bool {
        matches!(self, GarboError::Transient(_))
    }
}

impl From<tokio::task::JoinError> for GarboError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            GarboError::Cancelled(err.to_string())
        } else {
            GarboError::TaskPanicked(err.to_string())
        }
    }
}

impl From<figment::Error> for GarboError {
    fn from(err: figment::Error) -> Self {
        GarboError::Config(err.to_string())
    }
}

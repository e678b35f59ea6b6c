//! Advisory lock port.
//!
//! One lock per task name keeps two scheduler instances (threads in this
//! process, or processes on other hosts sharing the lock directory) from
//! running the same task at the same time. Acquisition never blocks.

use crate::domain::TaskName;
use crate::error::GarboError;

/// A held advisory lock.
///
/// The holder must call `release`; implementations also release on drop so a
/// panicking worker cannot leave a task locked for the rest of the process.
pub trait TaskLock: Send {
    fn name(&self) -> &TaskName;

    /// Where the lock lives (a file path, a key, ...), for log messages.
    fn location(&self) -> String;

    fn release(self: Box<Self>) -> Result<(), GarboError>;
}

/// Lock manager port.
pub trait LockManager: Send + Sync {
    /// Try to take the lock for `name`.
    ///
    /// Returns `Ok(None)` when someone else holds it.
    fn try_acquire(&self, name: &TaskName) -> Result<Option<Box<dyn TaskLock>>, GarboError>;
}

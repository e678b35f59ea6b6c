//! Ports - abstraction layer.
//!
//! Each trait is the seam to something outside the scheduler: the database
//! holding the tables to prune, the advisory lock backing, and time.

pub mod clock;
pub mod job_state;
pub mod lock;
pub mod prune_store;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::job_state::{JobStateStore, load_job_state, save_job_state};
pub use self::lock::{LockManager, TaskLock};
pub use self::prune_store::{BatchOutcome, CursorHandle, PruneStore, RangeOutcome};

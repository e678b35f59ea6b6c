//! Impls - implementations of the ports.
//!
//! - **SqliteStore**: `PruneStore` + `JobStateStore` on SQLite
//! - **FileLockManager**: advisory locks as `flock`ed files
//! - **MemoryLockManager**: process-local locks (tests, single host)

pub mod file_lock;
pub mod memory_lock;
pub mod sqlite;

pub use self::file_lock::FileLockManager;
pub use self::memory_lock::MemoryLockManager;
pub use self::sqlite::SqliteStore;

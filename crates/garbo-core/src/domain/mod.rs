//! Domain model (task names, table descriptors, states, reports).

pub mod name;
pub mod report;
pub mod state;
pub mod table;
pub mod task_set;

pub use self::name::TaskName;
pub use self::report::RunReport;
pub use self::state::TaskState;
pub use self::table::{KeyColumn, KeyType, SqlQuery, SqlValue, TargetTable};
pub use self::task_set::TaskSet;

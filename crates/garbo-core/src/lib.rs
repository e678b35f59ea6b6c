//! garbo-core
//!
//! Batched database maintenance: chunked pruning loops, a chunk-size
//! auto-tuner, and a runner that spreads tasks over a worker pool under a
//! global deadline with per-task advisory locks.
//!
//! # Modules
//! - **domain**: task names, table descriptors, task states, run reports
//! - **ports**: traits at the edges (PruneStore, JobStateStore, LockManager, Clock)
//! - **impls**: SQLite store, file locks, in-memory locks
//! - **tuner**: TunableLoop, ChunkTuner, LoopTuner
//! - **pruner**: BulkPruner, LimitedPruner, ResumablePruner
//! - **runner**: task queue, time budgets, workers
//! - **registry** / **config**: which tasks exist and how they are configured

pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod pruner;
pub mod registry;
pub mod runner;
pub mod tuner;

pub use self::config::GarboConfig;
pub use self::domain::{RunReport, TaskName, TaskSet, TaskState};
pub use self::error::GarboError;
pub use self::registry::TaskRegistry;
pub use self::runner::{Runner, RunnerOptions};

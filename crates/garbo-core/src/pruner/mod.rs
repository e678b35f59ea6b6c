//! Pruners - the loops that delete or rewrite rows.
//!
//! - **BulkPruner**: candidate set computed once through a holdable cursor
//! - **LimitedPruner**: `LIMIT`ed delete re-evaluated per chunk
//! - **ResumablePruner**: key range scan with a persisted resume point
//! - **StatementLoop**: any statement taking `:limit`, repeated until idle

pub mod bulk;
pub mod limited;
pub mod resumable;
pub mod statement;

use std::sync::Arc;

use async_trait::async_trait;

pub use self::bulk::BulkPruner;
pub use self::limited::LimitedPruner;
pub use self::resumable::{ResumablePruner, ResumePoint};
pub use self::statement::StatementLoop;

use crate::domain::{SqlQuery, TargetTable, TaskName};
use crate::error::GarboError;
use crate::ports::{JobStateStore, PruneStore};
use crate::runner::LoopFactory;
use crate::tuner::{ChunkBounds, TunableLoop};

/// What a pruning task deletes, and how.
#[derive(Debug, Clone, PartialEq)]
pub enum PruneJob {
    Bulk {
        table: TargetTable,
        query: SqlQuery,
    },
    Limited {
        table: TargetTable,
        query: SqlQuery,
    },
    Resumable {
        table: TargetTable,
        predicate: SqlQuery,
    },
    Statement {
        statement: SqlQuery,
    },
}

/// Builds the pruner for a [`PruneJob`] on every run.
pub struct PrunerFactory {
    job: PruneJob,
    store: Arc<dyn PruneStore>,
    job_state: Arc<dyn JobStateStore>,
    bounds: Option<ChunkBounds>,
}

impl PrunerFactory {
    pub fn new(
        job: PruneJob,
        store: Arc<dyn PruneStore>,
        job_state: Arc<dyn JobStateStore>,
    ) -> Self {
        Self {
            job,
            store,
            job_state,
            bounds: None,
        }
    }

    /// Replace the pruner's default chunk bounds.
    pub fn with_bounds(mut self, bounds: Option<ChunkBounds>) -> Self {
        self.bounds = bounds;
        self
    }
}

#[async_trait]
impl LoopFactory for PrunerFactory {
    async fn build(&self, name: &TaskName) -> Result<Box<dyn TunableLoop>, GarboError> {
        let store = Arc::clone(&self.store);
        let pruner: Box<dyn TunableLoop> = match &self.job {
            PruneJob::Bulk { table, query } => {
                let pruner = BulkPruner::open(name.clone(), store, table.clone(), query).await?;
                match self.bounds {
                    Some(bounds) => Box::new(pruner.with_bounds(bounds)),
                    None => Box::new(pruner),
                }
            }
            PruneJob::Limited { table, query } => {
                let pruner = LimitedPruner::new(store, table.clone(), query.clone())?;
                match self.bounds {
                    Some(bounds) => Box::new(pruner.with_bounds(bounds)),
                    None => Box::new(pruner),
                }
            }
            PruneJob::Resumable { table, predicate } => {
                let pruner = ResumablePruner::open(
                    name.clone(),
                    store,
                    Arc::clone(&self.job_state),
                    table.clone(),
                    predicate.clone(),
                )
                .await?;
                match self.bounds {
                    Some(bounds) => Box::new(pruner.with_bounds(bounds)),
                    None => Box::new(pruner),
                }
            }
            PruneJob::Statement { statement } => {
                let task_loop = StatementLoop::new(store, statement.clone())?;
                match self.bounds {
                    Some(bounds) => Box::new(task_loop.with_bounds(bounds)),
                    None => Box::new(task_loop),
                }
            }
        };
        Ok(pruner)
    }
}

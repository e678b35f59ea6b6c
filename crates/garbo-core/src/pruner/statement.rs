//! StatementLoop - repeat a chunked statement until it does no work.
//!
//! Covers updates and rollup-style function calls as well as deletes that
//! need more than a key match. The statement binds the chunk size to
//! `:limit` and reports its work either as affected rows or, for a query,
//! as the integer in its first column.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::SqlQuery;
use crate::error::GarboError;
use crate::ports::PruneStore;
use crate::tuner::{ChunkBounds, ChunkTuner, TunableLoop};

pub struct StatementLoop {
    store: Arc<dyn PruneStore>,
    statement: SqlQuery,
    bounds: ChunkBounds,
    done: bool,
    affected: u64,
}

impl StatementLoop {
    pub const MAXIMUM_CHUNK_SIZE: f64 = 10_000.0;

    pub fn new(store: Arc<dyn PruneStore>, statement: SqlQuery) -> Result<Self, GarboError> {
        if !statement.sql.contains(":limit") {
            return Err(GarboError::Config(format!(
                "statement has no :limit parameter: {}",
                statement.sql
            )));
        }
        Ok(Self {
            store,
            statement,
            bounds: ChunkBounds::up_to(Self::MAXIMUM_CHUNK_SIZE)?,
            done: false,
            affected: 0,
        })
    }

    pub fn with_bounds(mut self, bounds: ChunkBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn affected(&self) -> u64 {
        self.affected
    }
}

#[async_trait]
impl TunableLoop for StatementLoop {
    fn is_done(&self) -> bool {
        self.done
    }

    async fn step(&mut self, chunk_size: f64) -> Result<(), GarboError> {
        let affected = self
            .store
            .execute_chunk(&self.statement, ChunkTuner::batch_size(chunk_size))
            .await?;
        self.affected += affected;
        if affected == 0 {
            self.done = true;
        }
        tracing::debug!(affected, "chunk committed");
        Ok(())
    }

    async fn clean_up(&mut self) -> Result<(), GarboError> {
        tracing::info!(affected = self.affected, "statement loop stopped");
        Ok(())
    }

    fn chunk_bounds(&self) -> ChunkBounds {
        self.bounds
    }
}
